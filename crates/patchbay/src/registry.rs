//! Registry server state: providers, discoverers, and the REQ_SERVICE state
//! machine that glues them together.
//!
//! A connection is a provider or a discoverer, never both. Registry state is
//! in-memory only; a restart wipes it and providers re-register.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use patchbay_wire::{
    HostAddress, Message, ResponseCode, ServiceAction, ServiceRequest, ServiceResponse,
};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::net::{CloseHook, Connection, ConnectionId};
use crate::requestor::fresh_id;

struct ProviderEntry {
    host: HostAddress,
    methods: Vec<String>,
}

#[derive(Default)]
struct ProviderState {
    by_method: HashMap<String, HashSet<ConnectionId>>,
    by_conn: HashMap<ConnectionId, ProviderEntry>,
}

/// Which provider offers which methods. Invariant: a connection maps to at
/// most one provider record, and that record appears in the method index for
/// exactly the methods it lists.
#[derive(Default)]
struct ProviderManager {
    state: Mutex<ProviderState>,
}

impl ProviderManager {
    /// Finds or creates the provider record for `conn` and adds `method` to
    /// it. Re-registering the same method appends again; the method index is
    /// a set, so lookups stay exact.
    fn create_provider(&self, conn: ConnectionId, host: &HostAddress, method: &str) {
        let mut state = self.state.lock().expect("provider state lock poisoned");
        let entry = state.by_conn.entry(conn).or_insert_with(|| ProviderEntry {
            host: host.clone(),
            methods: Vec::new(),
        });
        entry.methods.push(method.to_string());
        state
            .by_method
            .entry(method.to_string())
            .or_default()
            .insert(conn);
    }

    /// The provider's host and method list, if `conn` is a provider.
    fn snapshot(&self, conn: ConnectionId) -> Option<(HostAddress, Vec<String>)> {
        let state = self.state.lock().expect("provider state lock poisoned");
        state
            .by_conn
            .get(&conn)
            .map(|entry| (entry.host.clone(), entry.methods.clone()))
    }

    fn remove_provider(&self, conn: ConnectionId) {
        let mut state = self.state.lock().expect("provider state lock poisoned");
        let Some(entry) = state.by_conn.remove(&conn) else {
            return;
        };
        for method in &entry.methods {
            let emptied = match state.by_method.get_mut(method) {
                Some(providers) => {
                    providers.remove(&conn);
                    providers.is_empty()
                }
                None => false,
            };
            if emptied {
                state.by_method.remove(method);
            }
        }
    }

    fn hosts_for_method(&self, method: &str) -> Vec<HostAddress> {
        let state = self.state.lock().expect("provider state lock poisoned");
        let Some(providers) = state.by_method.get(method) else {
            return Vec::new();
        };
        providers
            .iter()
            .filter_map(|conn| state.by_conn.get(conn))
            .map(|entry| entry.host.clone())
            .collect()
    }
}

struct DiscovererEntry {
    conn: Arc<Connection>,
    methods: Vec<String>,
}

#[derive(Default)]
struct DiscovererState {
    by_method: HashMap<String, HashSet<ConnectionId>>,
    by_conn: HashMap<ConnectionId, DiscovererEntry>,
}

/// Which client wants online/offline notifications for which methods.
#[derive(Default)]
struct DiscovererManager {
    state: Mutex<DiscovererState>,
}

impl DiscovererManager {
    fn create_discoverer(&self, conn: &Arc<Connection>, method: &str) {
        let mut state = self.state.lock().expect("discoverer state lock poisoned");
        let entry = state
            .by_conn
            .entry(conn.id())
            .or_insert_with(|| DiscovererEntry {
                conn: conn.clone(),
                methods: Vec::new(),
            });
        entry.methods.push(method.to_string());
        state
            .by_method
            .entry(method.to_string())
            .or_default()
            .insert(conn.id());
    }

    fn remove_discoverer(&self, conn: ConnectionId) {
        let mut state = self.state.lock().expect("discoverer state lock poisoned");
        let Some(entry) = state.by_conn.remove(&conn) else {
            return;
        };
        for method in &entry.methods {
            let emptied = match state.by_method.get_mut(method) {
                Some(discoverers) => {
                    discoverers.remove(&conn);
                    discoverers.is_empty()
                }
                None => false,
            };
            if emptied {
                state.by_method.remove(method);
            }
        }
    }

    /// Fans an online/offline notice out to every discoverer of `method`.
    /// Sends happen outside the state lock; a dead discoverer is skipped.
    fn notify(&self, method: &str, host: &HostAddress, action: ServiceAction) {
        let targets: Vec<Arc<Connection>> = {
            let state = self.state.lock().expect("discoverer state lock poisoned");
            let Some(discoverers) = state.by_method.get(method) else {
                return;
            };
            discoverers
                .iter()
                .filter_map(|conn| state.by_conn.get(conn))
                .map(|entry| entry.conn.clone())
                .collect()
        };

        let notice: Message = ServiceRequest::notice(action, method, host)
            .with_id(fresh_id())
            .into();
        for conn in targets {
            if let Err(err) = conn.send(notice.clone()) {
                debug!(conn = conn.id(), %err, "could not notify discoverer");
            }
        }
    }
}

/// The registry's REQ_SERVICE handler: routes REGISTRY and DISCOVERY
/// operations into the provider and discoverer managers.
#[derive(Default)]
pub struct PdManager {
    providers: ProviderManager,
    discoverers: DiscovererManager,
}

impl PdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher handler for REQ_SERVICE.
    pub fn on_request(&self, conn: &Arc<Connection>, req: ServiceRequest) {
        match req.action() {
            Some(ServiceAction::Registry) => {
                let (method, host) = match (req.method(), req.host()) {
                    (Some(method), Some(host)) => (method.to_string(), host),
                    _ => {
                        self.reply_invalid(conn, &req);
                        return;
                    }
                };
                info!(%method, %host, conn = conn.id(), "provider registered");
                self.providers.create_provider(conn.id(), &host, &method);
                self.discoverers
                    .notify(&method, &host, ServiceAction::Online);
                self.reply(
                    conn,
                    ServiceResponse::ack(req.id(), ServiceAction::Registry, ResponseCode::Ok),
                );
            }
            Some(ServiceAction::Discovery) => {
                let Some(method) = req.method().map(str::to_string) else {
                    self.reply_invalid(conn, &req);
                    return;
                };
                self.discoverers.create_discoverer(conn, &method);
                let hosts = self.providers.hosts_for_method(&method);
                let code = if hosts.is_empty() {
                    ResponseCode::NotFoundService
                } else {
                    ResponseCode::Ok
                };
                debug!(%method, providers = hosts.len(), conn = conn.id(), "discovery query");
                self.reply(
                    conn,
                    ServiceResponse::discovery(req.id(), code, &method, &hosts),
                );
            }
            _ => {
                warn!(conn = conn.id(), "service request with invalid optype");
                self.reply(
                    conn,
                    ServiceResponse::ack(req.id(), ServiceAction::Unknown, ResponseCode::InvalidOptype),
                );
            }
        }
    }

    /// Close path: a provider's methods go offline before its record is
    /// deleted; otherwise the connection is treated as a discoverer.
    pub fn on_close(&self, conn: &Arc<Connection>) {
        if let Some((host, methods)) = self.providers.snapshot(conn.id()) {
            info!(%host, conn = conn.id(), "provider disconnected, going offline");
            for method in &methods {
                self.discoverers
                    .notify(method, &host, ServiceAction::Offline);
            }
            self.providers.remove_provider(conn.id());
        } else {
            self.discoverers.remove_discoverer(conn.id());
        }
    }

    /// Wires this manager into a dispatcher.
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let manager = self.clone();
        dispatcher.register(move |conn: &Arc<Connection>, req: ServiceRequest| {
            manager.on_request(conn, req);
        });
    }

    pub fn close_hook(self: &Arc<Self>) -> CloseHook {
        let manager = self.clone();
        Arc::new(move |conn: &Arc<Connection>| manager.on_close(conn))
    }

    fn reply(&self, conn: &Arc<Connection>, rsp: ServiceResponse) {
        if let Err(err) = conn.send(rsp.into()) {
            debug!(conn = conn.id(), %err, "could not send service response");
        }
    }

    fn reply_invalid(&self, conn: &Arc<Connection>, req: &ServiceRequest) {
        self.reply(
            conn,
            ServiceResponse::ack(req.id(), ServiceAction::Unknown, ResponseCode::InvalidMsg),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(port: u16) -> HostAddress {
        HostAddress::new("127.0.0.1", port)
    }

    #[test]
    fn provider_record_and_method_index_stay_consistent() {
        let providers = ProviderManager::default();
        providers.create_provider(1, &host(9090), "Add");
        providers.create_provider(1, &host(9090), "Sub");
        providers.create_provider(2, &host(9091), "Add");

        assert_eq!(providers.hosts_for_method("Add").len(), 2);
        assert_eq!(providers.hosts_for_method("Sub"), vec![host(9090)]);
        assert!(providers.hosts_for_method("Mul").is_empty());

        let (recorded_host, methods) = providers.snapshot(1).unwrap();
        assert_eq!(recorded_host, host(9090));
        assert_eq!(methods, vec!["Add".to_string(), "Sub".to_string()]);

        providers.remove_provider(1);
        assert!(providers.snapshot(1).is_none());
        assert_eq!(providers.hosts_for_method("Add"), vec![host(9091)]);
        assert!(providers.hosts_for_method("Sub").is_empty());
    }

    #[test]
    fn one_record_per_connection() {
        let providers = ProviderManager::default();
        providers.create_provider(7, &host(9090), "Add");
        providers.create_provider(7, &host(9090), "Add");

        // Duplicate registration keeps a single provider entry per method.
        assert_eq!(providers.hosts_for_method("Add"), vec![host(9090)]);
        providers.remove_provider(7);
        assert!(providers.hosts_for_method("Add").is_empty());
    }
}
