//! Registry + discovery flows: registration, discovery-mode calling, the
//! connection cache, round-robin balancing, and online/offline propagation.

use std::time::Duration;

use patchbay::{
    ClientConfig, EndpointConfig, HostAddress, ParamKind, RegistryServer, ResponseCode, RpcClient,
    RpcServer, ServiceDescriptor,
};
use serde_json::json;

fn add_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::builder("Add")
        .param("num1", ParamKind::Integral)
        .param("num2", ParamKind::Integral)
        .returns(ParamKind::Integral)
        .build(|params| {
            let a = params.get("num1")?.as_i64()?;
            let b = params.get("num2")?.as_i64()?;
            Some(json!(a + b))
        })
}

async fn start_registry() -> String {
    let registry = RegistryServer::bind("127.0.0.1:0", EndpointConfig::default())
        .await
        .unwrap();
    let addr = registry.local_addr().to_string();
    tokio::spawn(registry.serve());
    addr
}

/// Binds an RPC server, announces `descriptor` to the registry, and serves in
/// the background. Returns the advertised host and the serve task handle.
async fn start_provider(
    registry_addr: &str,
    descriptor: ServiceDescriptor,
) -> (HostAddress, tokio::task::JoinHandle<()>) {
    let server = RpcServer::bind("127.0.0.1:0", EndpointConfig::default())
        .await
        .unwrap();
    let host = HostAddress::new("127.0.0.1", server.local_addr().port());
    let server = server
        .with_registry(registry_addr, host.clone(), ClientConfig::default())
        .await
        .unwrap();
    server.register(descriptor).await.unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (host, handle)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn discovery_mode_call_reaches_a_registered_provider() {
    let registry_addr = start_registry().await;
    let (host, _provider) = start_provider(&registry_addr, add_descriptor()).await;

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    let result = client
        .call("Add", json!({ "num1": 3, "num2": 4 }))
        .await
        .unwrap();
    assert_eq!(result, json!(7));

    // The provider's connection is now cached for reuse.
    assert_eq!(client.cached_hosts(), vec![host.clone()]);
    assert!(client.discovery().unwrap().knows_host("Add", &host));
}

#[tokio::test]
async fn provider_close_propagates_offline_and_evicts_the_cache() {
    let registry_addr = start_registry().await;
    let (host, provider) = start_provider(&registry_addr, add_descriptor()).await;

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    client
        .call("Add", json!({ "num1": 1, "num2": 2 }))
        .await
        .unwrap();
    assert!(!client.cached_hosts().is_empty());

    // Killing the provider drops its registry link; the registry must emit
    // OFFLINE(Add, host) to the discoverer.
    provider.abort();
    wait_for("offline propagation", || {
        client.cached_hosts().is_empty()
            && !client.discovery().unwrap().knows_host("Add", &host)
    })
    .await;

    // With the pool empty, further calls find no provider.
    let err = client
        .call("Add", json!({ "num1": 1, "num2": 2 }))
        .await
        .unwrap_err();
    assert!(err.response_code().is_none());
}

#[tokio::test]
async fn discovery_of_an_unregistered_method_fails() {
    let registry_addr = start_registry().await;
    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();

    let err = client.call("Nope", json!({})).await.unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundService));
}

#[tokio::test]
async fn online_notification_fills_the_pool_after_a_failed_discovery() {
    let registry_addr = start_registry().await;
    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();

    // The failed discovery still registers this client as a discoverer of
    // "Add", so it gets the ONLINE push when a provider appears.
    let err = client.call("Add", json!({ "num1": 1, "num2": 2 })).await.unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundService));

    let (host, _provider) = start_provider(&registry_addr, add_descriptor()).await;
    wait_for("online propagation", || {
        client.discovery().unwrap().knows_host("Add", &host)
    })
    .await;

    let result = client
        .call("Add", json!({ "num1": 1, "num2": 2 }))
        .await
        .unwrap();
    assert_eq!(result, json!(3));
}

#[tokio::test]
async fn calls_round_robin_across_providers() {
    let registry_addr = start_registry().await;

    let who = |name: &'static str| {
        ServiceDescriptor::builder("Who")
            .returns(ParamKind::String)
            .build(move |_| Some(json!(name)))
    };
    let (_host_a, _provider_a) = start_provider(&registry_addr, who("a")).await;
    let (_host_b, _provider_b) = start_provider(&registry_addr, who("b")).await;

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    let mut answers = Vec::new();
    for _ in 0..4 {
        let result = client.call("Who", json!({})).await.unwrap();
        answers.push(result.as_str().unwrap_or_default().to_string());
    }

    // Two providers, four calls, strict rotation: each answers twice.
    let a_count = answers.iter().filter(|name| name.as_str() == "a").count();
    assert_eq!(a_count, 2, "expected alternation, got {answers:?}");
    assert_eq!(client.cached_hosts().len(), 2);
}

#[tokio::test]
async fn offline_keeps_the_other_provider_usable() {
    let registry_addr = start_registry().await;
    let echo = |tag: &'static str| {
        ServiceDescriptor::builder("Tag")
            .returns(ParamKind::String)
            .build(move |_| Some(json!(tag)))
    };
    let (host_a, provider_a) = start_provider(&registry_addr, echo("a")).await;
    let (_host_b, _provider_b) = start_provider(&registry_addr, echo("b")).await;

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    client.call("Tag", json!({})).await.unwrap();

    provider_a.abort();
    wait_for("offline for provider a", || {
        !client.discovery().unwrap().knows_host("Tag", &host_a)
    })
    .await;

    for _ in 0..3 {
        let result = client.call("Tag", json!({})).await.unwrap();
        assert_eq!(result, json!("b"));
    }
}

#[tokio::test]
async fn direct_and_registry_registration_can_coexist() {
    // A provider can serve direct-mode callers while registered.
    let registry_addr = start_registry().await;
    let (host, _provider) = start_provider(&registry_addr, add_descriptor()).await;

    let direct = RpcClient::direct(&host.to_string(), ClientConfig::default())
        .await
        .unwrap();
    let result = direct
        .call("Add", json!({ "num1": 5, "num2": 6 }))
        .await
        .unwrap();
    assert_eq!(result, json!(11));
    assert!(direct.cached_hosts().is_empty());

    let discovered = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    let result = discovered
        .call("Add", json!({ "num1": 5, "num2": 6 }))
        .await
        .unwrap();
    assert_eq!(result, json!(11));
}

#[tokio::test]
async fn param_validation_runs_on_the_provider() {
    let registry_addr = start_registry().await;
    let (_host, _provider) = start_provider(&registry_addr, add_descriptor()).await;

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default())
        .await
        .unwrap();
    let err = client
        .call("Add", json!({ "num1": [1], "num2": 2 }))
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::InvalidParams));
}
