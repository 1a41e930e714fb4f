//! Server facades: one per role, each wiring a dispatcher, the role's state
//! machine, and the close path onto a listening endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use patchbay_wire::{HostAddress, RpcRequest};
use tracing::info;

use crate::broker::PsManager;
use crate::client::RegistryClient;
use crate::config::{ClientConfig, EndpointConfig};
use crate::dispatch::Dispatcher;
use crate::error::PatchbayError;
use crate::net::{Connection, Endpoint};
use crate::registry::PdManager;
use crate::router::{Router, ServiceDescriptor};

struct RegistryBinding {
    client: RegistryClient,
    advertised: HostAddress,
}

/// Serves RPC methods. Optionally announces every registered method to a
/// registry, advertising a configured reachable host.
pub struct RpcServer {
    endpoint: Endpoint,
    router: Arc<Router>,
    registry: Option<RegistryBinding>,
}

impl RpcServer {
    pub async fn bind(addr: &str, config: EndpointConfig) -> Result<Self, PatchbayError> {
        let router = Arc::new(Router::new());
        let dispatcher = Arc::new(Dispatcher::new());
        {
            let router = router.clone();
            dispatcher.register(move |conn: &Arc<Connection>, req: RpcRequest| {
                router.on_request(conn, req);
            });
        }
        let endpoint = Endpoint::bind(addr, dispatcher, Vec::new(), &config).await?;
        info!(addr = %endpoint.local_addr(), "rpc server listening");
        Ok(Self {
            endpoint,
            router,
            registry: None,
        })
    }

    /// Connects to the registry at `registry_addr`; methods registered from
    /// here on are announced there with `advertised` as this server's
    /// reachable endpoint.
    pub async fn with_registry(
        mut self,
        registry_addr: &str,
        advertised: HostAddress,
        config: ClientConfig,
    ) -> Result<Self, PatchbayError> {
        let client = RegistryClient::connect(registry_addr, config).await?;
        self.registry = Some(RegistryBinding { client, advertised });
        Ok(self)
    }

    /// Publishes a method locally and, when a registry is attached, announces
    /// it there first.
    pub async fn register(&self, descriptor: ServiceDescriptor) -> Result<(), PatchbayError> {
        if let Some(binding) = &self.registry {
            binding
                .client
                .register_service(descriptor.method(), &binding.advertised)
                .await?;
        }
        self.router.register(descriptor)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Runs the accept loop. Keeps the registry connection alive for as long
    /// as the server serves, so its registrations stay online.
    pub async fn serve(self) -> Result<(), PatchbayError> {
        self.endpoint.serve().await
    }
}

/// The registry: tracks providers and discoverers and fans out
/// online/offline notifications.
pub struct RegistryServer {
    endpoint: Endpoint,
}

impl RegistryServer {
    pub async fn bind(addr: &str, config: EndpointConfig) -> Result<Self, PatchbayError> {
        let manager = Arc::new(PdManager::new());
        let dispatcher = Arc::new(Dispatcher::new());
        manager.attach(&dispatcher);
        let endpoint =
            Endpoint::bind(addr, dispatcher, vec![manager.close_hook()], &config).await?;
        info!(addr = %endpoint.local_addr(), "registry listening");
        Ok(Self { endpoint })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub async fn serve(self) -> Result<(), PatchbayError> {
        self.endpoint.serve().await
    }
}

/// The topic broker.
pub struct TopicServer {
    endpoint: Endpoint,
}

impl TopicServer {
    pub async fn bind(addr: &str, config: EndpointConfig) -> Result<Self, PatchbayError> {
        let broker = Arc::new(PsManager::new());
        let dispatcher = Arc::new(Dispatcher::new());
        broker.attach(&dispatcher);
        let endpoint = Endpoint::bind(addr, dispatcher, vec![broker.close_hook()], &config).await?;
        info!(addr = %endpoint.local_addr(), "topic broker listening");
        Ok(Self { endpoint })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub async fn serve(self) -> Result<(), PatchbayError> {
        self.endpoint.serve().await
    }
}
