//! Client facades: registry registration, discovery, RPC calling, and topics.

mod discovery;
mod pool;
mod topic;

pub use discovery::OfflineCallback;
pub use topic::SubscribeCallback;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay_wire::{
    FromMessage, HostAddress, Message, MessageKind, ResponseCode, RpcRequest, RpcResponse,
    ServiceRequest, ServiceResponse, TopicRequest,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::discovery::Discoverer;
use crate::client::topic::TopicManager;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::PatchbayError;
use crate::net::{Client, CloseHook, Connection};
use crate::requestor::{PendingResponse, Requestor};

/// Registers methods with a registry on behalf of a serving process.
pub struct RegistryClient {
    client: Client,
    requestor: Requestor,
    response_timeout: Duration,
}

impl RegistryClient {
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self, PatchbayError> {
        let requestor = Requestor::new();
        let dispatcher = Arc::new(Dispatcher::new());
        requestor.attach(&dispatcher, &[MessageKind::RspService]);
        let client =
            Client::connect(addr, dispatcher, vec![requestor.close_hook()], &config).await?;
        Ok(Self {
            client,
            requestor,
            response_timeout: config.response_timeout,
        })
    }

    /// Announces that this process serves `method` at `host`.
    pub async fn register_service(
        &self,
        method: &str,
        host: &HostAddress,
    ) -> Result<(), PatchbayError> {
        let pending = self.requestor.send(
            self.client.connection(),
            ServiceRequest::registry(method, host).into(),
        )?;
        let msg = pending.wait(self.response_timeout).await?;
        let rsp = ServiceResponse::from_message(msg)
            .ok_or(PatchbayError::MalformedResponse("expected RSP_SERVICE"))?;
        match rsp.code() {
            Some(ResponseCode::Ok) => Ok(()),
            Some(code) => Err(PatchbayError::Response { code }),
            None => Err(PatchbayError::MalformedResponse("unknown rcode")),
        }
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        // Closing the link is what takes this process's registrations
        // offline at the registry.
        self.client.shutdown();
    }
}

/// Asks a registry which providers serve a method and keeps the answer fresh
/// through online/offline pushes.
pub struct DiscoveryClient {
    client: Client,
    discoverer: Arc<Discoverer>,
}

impl DiscoveryClient {
    /// `offline` runs each time a provider goes offline, after the host has
    /// left its method pool.
    pub async fn connect<F>(
        addr: &str,
        offline: F,
        config: ClientConfig,
    ) -> Result<Self, PatchbayError>
    where
        F: Fn(&HostAddress) + Send + Sync + 'static,
    {
        let requestor = Requestor::new();
        let discoverer = Arc::new(Discoverer::new(
            requestor.clone(),
            Arc::new(offline),
            config.response_timeout,
        ));
        let dispatcher = Arc::new(Dispatcher::new());
        requestor.attach(&dispatcher, &[MessageKind::RspService]);
        {
            let discoverer = discoverer.clone();
            dispatcher.register(move |conn: &Arc<Connection>, req: ServiceRequest| {
                discoverer.on_notice(conn, req);
            });
        }
        let client =
            Client::connect(addr, dispatcher, vec![requestor.close_hook()], &config).await?;
        Ok(Self { client, discoverer })
    }

    /// Round-robin pick of a provider for `method`; queries the registry on
    /// first use of the method.
    pub async fn discover_service(&self, method: &str) -> Result<HostAddress, PatchbayError> {
        self.discoverer
            .discover(self.client.connection(), method)
            .await
    }

    /// Whether the pool for `method` currently lists `host`.
    pub fn knows_host(&self, method: &str, host: &HostAddress) -> bool {
        self.discoverer.knows_host(method, host)
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.client.shutdown();
    }
}

enum CallTarget {
    Direct(Client),
    Discovery {
        discovery: DiscoveryClient,
        cache: Arc<Mutex<HashMap<HostAddress, Arc<Client>>>>,
        dispatcher: Arc<Dispatcher>,
        close_hooks: Vec<CloseHook>,
    },
}

/// Invokes remote methods, either against one named server or against
/// whatever providers a registry advertises.
pub struct RpcClient {
    requestor: Requestor,
    config: ClientConfig,
    target: CallTarget,
}

impl RpcClient {
    /// Direct mode: every call goes to the one server at `addr`.
    pub async fn direct(addr: &str, config: ClientConfig) -> Result<Self, PatchbayError> {
        let requestor = Requestor::new();
        let dispatcher = Arc::new(Dispatcher::new());
        requestor.attach(&dispatcher, &[MessageKind::RspRpc]);
        let client =
            Client::connect(addr, dispatcher, vec![requestor.close_hook()], &config).await?;
        Ok(Self {
            requestor,
            config,
            target: CallTarget::Direct(client),
        })
    }

    /// Discovery mode: providers are found through the registry at
    /// `registry_addr`, and one long-lived connection per provider host is
    /// cached. An offline notice evicts the cache entry for that host without
    /// force-closing it; calls in flight on it finish or fail on their own.
    pub async fn with_discovery(
        registry_addr: &str,
        config: ClientConfig,
    ) -> Result<Self, PatchbayError> {
        let requestor = Requestor::new();
        let dispatcher = Arc::new(Dispatcher::new());
        requestor.attach(&dispatcher, &[MessageKind::RspRpc]);

        let cache: Arc<Mutex<HashMap<HostAddress, Arc<Client>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let offline = {
            let cache = cache.clone();
            move |host: &HostAddress| {
                if cache
                    .lock()
                    .expect("connection cache lock poisoned")
                    .remove(host)
                    .is_some()
                {
                    info!(%host, "evicted cached connection for offline provider");
                }
            }
        };
        let discovery = DiscoveryClient::connect(registry_addr, offline, config.clone()).await?;

        Ok(Self {
            requestor: requestor.clone(),
            config,
            target: CallTarget::Discovery {
                discovery,
                cache,
                dispatcher,
                close_hooks: vec![requestor.close_hook()],
            },
        })
    }

    /// Blocking style: sends and waits for the result, bounded by the
    /// configured response timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, PatchbayError> {
        let pending = self.start_call(method, params).await?;
        pending.result().await
    }

    /// Future style: returns as soon as the request is on the wire; await
    /// [`PendingCall::result`] later for the outcome.
    pub async fn call_future(
        &self,
        method: &str,
        params: Value,
    ) -> Result<PendingCall, PatchbayError> {
        self.start_call(method, params).await
    }

    /// Callback style: `on_result` is invoked with the unwrapped result, or
    /// with the error if the call fails or the connection dies.
    pub async fn call_with<F>(
        &self,
        method: &str,
        params: Value,
        on_result: F,
    ) -> Result<(), PatchbayError>
    where
        F: FnOnce(Result<Value, PatchbayError>) + Send + 'static,
    {
        let conn = self.connection_for(method).await?;
        self.requestor.send_callback(
            &conn,
            RpcRequest::new(method, params).into(),
            move |result| on_result(result.and_then(unwrap_rpc_result)),
        )?;
        Ok(())
    }

    /// The discovery side of this client, when it runs in discovery mode.
    pub fn discovery(&self) -> Option<&DiscoveryClient> {
        match &self.target {
            CallTarget::Direct(_) => None,
            CallTarget::Discovery { discovery, .. } => Some(discovery),
        }
    }

    /// Hosts with a cached connection (empty in direct mode).
    pub fn cached_hosts(&self) -> Vec<HostAddress> {
        match &self.target {
            CallTarget::Direct(_) => Vec::new(),
            CallTarget::Discovery { cache, .. } => cache
                .lock()
                .expect("connection cache lock poisoned")
                .keys()
                .cloned()
                .collect(),
        }
    }

    async fn start_call(&self, method: &str, params: Value) -> Result<PendingCall, PatchbayError> {
        let conn = self.connection_for(method).await?;
        let pending = self
            .requestor
            .send(&conn, RpcRequest::new(method, params).into())?;
        Ok(PendingCall {
            pending,
            timeout: self.config.response_timeout,
        })
    }

    async fn connection_for(&self, method: &str) -> Result<Arc<Connection>, PatchbayError> {
        match &self.target {
            CallTarget::Direct(client) => Ok(client.connection().clone()),
            CallTarget::Discovery {
                discovery,
                cache,
                dispatcher,
                close_hooks,
            } => {
                let host = discovery.discover_service(method).await?;

                // Cache lookup and connect are separate lock scopes: the
                // cache lock is never held across connect.
                if let Some(existing) = cache
                    .lock()
                    .expect("connection cache lock poisoned")
                    .get(&host)
                    .cloned()
                {
                    return Ok(existing.connection().clone());
                }

                debug!(%host, %method, "dialing provider");
                let fresh = Arc::new(
                    Client::connect(
                        &host.to_string(),
                        dispatcher.clone(),
                        close_hooks.clone(),
                        &self.config,
                    )
                    .await?,
                );
                let client = {
                    let mut cache = cache.lock().expect("connection cache lock poisoned");
                    match cache.entry(host) {
                        // Another call dialed the same host first; keep the
                        // established entry and drop ours.
                        Entry::Occupied(entry) => {
                            fresh.shutdown();
                            entry.get().clone()
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(fresh.clone());
                            fresh
                        }
                    }
                };
                Ok(client.connection().clone())
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        match &self.target {
            CallTarget::Direct(client) => client.shutdown(),
            CallTarget::Discovery { cache, .. } => {
                let cached: Vec<Arc<Client>> = cache
                    .lock()
                    .expect("connection cache lock poisoned")
                    .drain()
                    .map(|(_, client)| client)
                    .collect();
                for client in cached {
                    client.shutdown();
                }
            }
        }
    }
}

/// Handle for an in-flight RPC call (future style).
pub struct PendingCall {
    pending: PendingResponse,
    timeout: Duration,
}

impl PendingCall {
    /// The request id on the wire.
    pub fn id(&self) -> &str {
        self.pending.id()
    }

    /// Waits for the response and unwraps the JSON `result` value.
    pub async fn result(self) -> Result<Value, PatchbayError> {
        let msg = self.pending.wait(self.timeout).await?;
        unwrap_rpc_result(msg)
    }
}

fn unwrap_rpc_result(msg: Message) -> Result<Value, PatchbayError> {
    let rsp = RpcResponse::from_message(msg)
        .ok_or(PatchbayError::MalformedResponse("expected RSP_RPC"))?;
    match rsp.code() {
        Some(ResponseCode::Ok) => rsp
            .result()
            .cloned()
            .ok_or(PatchbayError::MalformedResponse("missing result")),
        Some(code) => Err(PatchbayError::Response { code }),
        None => Err(PatchbayError::MalformedResponse("unknown rcode")),
    }
}

/// Talks to a topic broker: topic lifecycle, subscription, and publishing.
pub struct TopicClient {
    client: Client,
    topics: Arc<TopicManager>,
}

impl TopicClient {
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self, PatchbayError> {
        let requestor = Requestor::new();
        let topics = Arc::new(TopicManager::new(
            requestor.clone(),
            config.response_timeout,
        ));
        let dispatcher = Arc::new(Dispatcher::new());
        requestor.attach(&dispatcher, &[MessageKind::RspTopic]);
        {
            let topics = topics.clone();
            dispatcher.register(move |conn: &Arc<Connection>, req: TopicRequest| {
                topics.on_publish(conn, req);
            });
        }
        let client =
            Client::connect(addr, dispatcher, vec![requestor.close_hook()], &config).await?;
        Ok(Self { client, topics })
    }

    pub async fn create(&self, key: &str) -> Result<(), PatchbayError> {
        self.topics.create(self.client.connection(), key).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), PatchbayError> {
        self.topics.remove(self.client.connection(), key).await
    }

    /// Subscribes to `key`; `callback(topic_key, payload)` runs for every
    /// message the broker pushes on it.
    pub async fn subscribe<F>(&self, key: &str, callback: F) -> Result<(), PatchbayError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.topics
            .subscribe(self.client.connection(), key, Arc::new(callback))
            .await
    }

    pub async fn cancel(&self, key: &str) -> Result<(), PatchbayError> {
        self.topics.cancel(self.client.connection(), key).await
    }

    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), PatchbayError> {
        self.topics
            .publish(self.client.connection(), key, payload)
            .await
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }
}

impl Drop for TopicClient {
    fn drop(&mut self) {
        self.client.shutdown();
    }
}
