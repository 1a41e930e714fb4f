//! Runs the whole discovery stack in one process: a registry, a provider that
//! registers itself, and a discovery-mode client. Then it takes the provider
//! down to show offline propagation.
//!
//! Usage:
//! ```sh
//! cargo run -p patchbay --example registry_stack
//! ```

use std::{error::Error, time::Duration};

use patchbay::{
    ClientConfig, EndpointConfig, HostAddress, ParamKind, RegistryServer, RpcClient, RpcServer,
    ServiceDescriptor,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let registry = RegistryServer::bind("127.0.0.1:0", EndpointConfig::default()).await?;
    let registry_addr = registry.local_addr().to_string();
    tokio::spawn(registry.serve());
    println!("registry on {registry_addr}");

    let provider = RpcServer::bind("127.0.0.1:0", EndpointConfig::default()).await?;
    let host = HostAddress::new("127.0.0.1", provider.local_addr().port());
    let provider = provider
        .with_registry(&registry_addr, host.clone(), ClientConfig::default())
        .await?;
    provider
        .register(
            ServiceDescriptor::builder("Add")
                .param("num1", ParamKind::Integral)
                .param("num2", ParamKind::Integral)
                .returns(ParamKind::Integral)
                .build(|params| {
                    let a = params.get("num1")?.as_i64()?;
                    let b = params.get("num2")?.as_i64()?;
                    Some(json!(a + b))
                }),
        )
        .await?;
    let provider_task = tokio::spawn(provider.serve());
    println!("provider for Add on {host}");

    let client = RpcClient::with_discovery(&registry_addr, ClientConfig::default()).await?;
    let sum = client.call("Add", json!({ "num1": 3, "num2": 4 })).await?;
    println!("Add(3, 4) = {sum} via discovered provider");
    println!("cached connections: {:?}", client.cached_hosts());

    // Take the provider down; the registry pushes OFFLINE to the client.
    provider_task.abort();
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!(
        "after provider shutdown, cached connections: {:?}",
        client.cached_hosts()
    );
    match client.call("Add", json!({ "num1": 3, "num2": 4 })).await {
        Ok(sum) => println!("unexpected success: {sum}"),
        Err(err) => println!("call after offline fails as expected: {err}"),
    }

    Ok(())
}
