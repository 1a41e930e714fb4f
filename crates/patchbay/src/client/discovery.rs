//! Client-side discovery state: lazily populated per-method host pools kept
//! fresh by the registry's online/offline pushes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay_wire::{
    FromMessage, HostAddress, ResponseCode, ServiceAction, ServiceRequest, ServiceResponse,
};
use tracing::{debug, info, warn};

use crate::client::pool::HostPool;
use crate::error::PatchbayError;
use crate::net::Connection;
use crate::requestor::Requestor;

/// Invoked whenever the registry reports a provider offline, after the host
/// has left its pool. The discovery-mode RPC client uses it to evict its
/// cached connection for that host.
pub type OfflineCallback = Arc<dyn Fn(&HostAddress) + Send + Sync>;

/// Per-method host pools plus the inbound notification handler.
pub(crate) struct Discoverer {
    requestor: Requestor,
    pools: Mutex<HashMap<String, HostPool>>,
    offline_callback: OfflineCallback,
    response_timeout: Duration,
}

impl Discoverer {
    pub(crate) fn new(
        requestor: Requestor,
        offline_callback: OfflineCallback,
        response_timeout: Duration,
    ) -> Self {
        Self {
            requestor,
            pools: Mutex::new(HashMap::new()),
            offline_callback,
            response_timeout,
        }
    }

    /// Picks a provider for `method`, querying the registry over `conn` the
    /// first time the method is seen. Later calls rotate within the pool
    /// without touching the network.
    pub(crate) async fn discover(
        &self,
        conn: &Arc<Connection>,
        method: &str,
    ) -> Result<HostAddress, PatchbayError> {
        {
            let mut pools = self.pools.lock().expect("host pool lock poisoned");
            if let Some(pool) = pools.get_mut(method) {
                return pool.next().ok_or_else(|| PatchbayError::NoProvider {
                    method: method.to_string(),
                });
            }
        }

        let pending = self
            .requestor
            .send(conn, ServiceRequest::discovery(method).into())?;
        let msg = pending.wait(self.response_timeout).await?;
        let rsp = ServiceResponse::from_message(msg)
            .ok_or(PatchbayError::MalformedResponse("expected RSP_SERVICE"))?;
        match rsp.code() {
            Some(ResponseCode::Ok) => {}
            Some(code) => return Err(PatchbayError::Response { code }),
            None => return Err(PatchbayError::MalformedResponse("unknown rcode")),
        }

        let hosts = rsp.hosts();
        info!(%method, providers = hosts.len(), "discovered providers");
        let mut pools = self.pools.lock().expect("host pool lock poisoned");
        // An ONLINE push may have created the pool while we waited; merge
        // rather than clobber.
        let pool = pools.entry(method.to_string()).or_insert_with(HostPool::default);
        for host in hosts {
            pool.add(host);
        }
        pool.next().ok_or_else(|| PatchbayError::NoProvider {
            method: method.to_string(),
        })
    }

    /// Dispatcher handler for inbound REQ_SERVICE pushes (ONLINE/OFFLINE).
    pub(crate) fn on_notice(&self, _conn: &Arc<Connection>, req: ServiceRequest) {
        let (Some(method), Some(host)) = (req.method(), req.host()) else {
            warn!("service notice missing method or host, dropping");
            return;
        };
        match req.action() {
            Some(ServiceAction::Online) => {
                debug!(%method, %host, "provider online");
                let mut pools = self.pools.lock().expect("host pool lock poisoned");
                pools
                    .entry(method.to_string())
                    .or_insert_with(HostPool::default)
                    .add(host);
            }
            Some(ServiceAction::Offline) => {
                info!(%method, %host, "provider offline");
                {
                    let mut pools = self.pools.lock().expect("host pool lock poisoned");
                    if let Some(pool) = pools.get_mut(method) {
                        pool.remove(&host);
                    }
                }
                // Callback runs outside the pool lock; it may take other locks.
                (self.offline_callback)(&host);
            }
            _ => warn!(%method, "service notice with unexpected optype, dropping"),
        }
    }

    /// Whether the pool for `method` currently lists `host`.
    pub(crate) fn knows_host(&self, method: &str, host: &HostAddress) -> bool {
        let pools = self.pools.lock().expect("host pool lock poisoned");
        pools.get(method).is_some_and(|pool| pool.contains(host))
    }
}
