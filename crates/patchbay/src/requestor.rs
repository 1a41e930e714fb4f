//! Request/response correlation.
//!
//! Every outbound request gets a fresh id and a pending descriptor *before*
//! its bytes are handed to the connection; a response that races the send
//! completion therefore always finds its descriptor. Descriptors are consumed
//! exactly once: on the first matching response, on wait timeout, or when the
//! connection closes (completed with a disconnect error). A duplicate
//! response for an id finds no descriptor and is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay_wire::{Message, MessageKind, RpcResponse, ServiceResponse, TopicResponse};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::PatchbayError;
use crate::net::{CloseHook, Connection, ConnectionId};

/// Fresh opaque message id.
pub(crate) fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

type ResponseResult = Result<Message, PatchbayError>;
type ResponseCallback = Box<dyn FnOnce(ResponseResult) + Send>;

/// How the caller takes delivery: a one-shot channel serves both the future
/// and the blocking styles, a boxed function serves the callback style.
enum ResponseSlot {
    Channel(oneshot::Sender<ResponseResult>),
    Callback(ResponseCallback),
}

struct PendingEntry {
    conn: ConnectionId,
    request: Message,
    slot: ResponseSlot,
}

/// Correlates responses back to outstanding requests by id.
///
/// Cheap to clone; clones share the pending map.
#[derive(Clone, Default)]
pub struct Requestor {
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl Requestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding descriptors, across all connections.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending map lock poisoned").len()
    }

    /// Sends `req` with a fresh id and returns a handle that completes on the
    /// matching response.
    pub fn send(
        &self,
        conn: &Arc<Connection>,
        mut req: Message,
    ) -> Result<PendingResponse, PatchbayError> {
        let id = fresh_id();
        req.set_id(id.clone());
        let (tx, rx) = oneshot::channel();
        self.install(conn.id(), req.clone(), ResponseSlot::Channel(tx));
        if let Err(err) = conn.send(req) {
            self.discard(&id);
            return Err(err);
        }
        Ok(PendingResponse {
            id,
            rx,
            requestor: self.clone(),
        })
    }

    /// Sends `req` with a fresh id; `callback` is invoked with the response,
    /// or with a disconnect error if the connection dies first.
    pub fn send_callback<F>(
        &self,
        conn: &Arc<Connection>,
        mut req: Message,
        callback: F,
    ) -> Result<String, PatchbayError>
    where
        F: FnOnce(ResponseResult) + Send + 'static,
    {
        let id = fresh_id();
        req.set_id(id.clone());
        self.install(
            conn.id(),
            req.clone(),
            ResponseSlot::Callback(Box::new(callback)),
        );
        if let Err(err) = conn.send(req) {
            self.discard(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// Dispatcher handler for response kinds.
    pub fn on_response(&self, _conn: &Arc<Connection>, msg: Message) {
        let entry = self
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(msg.id());
        match entry {
            Some(entry) => {
                debug!(
                    id = msg.id(),
                    kind = msg.kind().as_str(),
                    request_kind = entry.request.kind().as_str(),
                    "delivering response"
                );
                deliver(entry.slot, Ok(msg));
            }
            // Late response: already timed out, cancelled, or a duplicate id.
            None => warn!(id = msg.id(), "response matches no outstanding request, dropping"),
        }
    }

    /// Completes every descriptor belonging to `conn` with a disconnect error.
    pub fn fail_all_for_conn(&self, conn: ConnectionId) {
        let drained: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().expect("pending map lock poisoned");
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.conn == conn)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        for entry in drained {
            debug!(
                request_kind = entry.request.kind().as_str(),
                "completing request with disconnect"
            );
            deliver(entry.slot, Err(PatchbayError::Disconnected));
        }
    }

    /// Registers `on_response` with the dispatcher for the given response
    /// kinds; non-response kinds are ignored.
    pub fn attach(&self, dispatcher: &Dispatcher, kinds: &[MessageKind]) {
        for kind in kinds {
            match kind {
                MessageKind::RspRpc => {
                    let requestor = self.clone();
                    dispatcher.register(move |conn: &Arc<Connection>, rsp: RpcResponse| {
                        requestor.on_response(conn, rsp.into());
                    });
                }
                MessageKind::RspTopic => {
                    let requestor = self.clone();
                    dispatcher.register(move |conn: &Arc<Connection>, rsp: TopicResponse| {
                        requestor.on_response(conn, rsp.into());
                    });
                }
                MessageKind::RspService => {
                    let requestor = self.clone();
                    dispatcher.register(move |conn: &Arc<Connection>, rsp: ServiceResponse| {
                        requestor.on_response(conn, rsp.into());
                    });
                }
                other => debug!(kind = other.as_str(), "not a response kind, skipping"),
            }
        }
    }

    /// Close hook completing this requestor's descriptors for the dead
    /// connection.
    pub fn close_hook(&self) -> CloseHook {
        let requestor = self.clone();
        Arc::new(move |conn: &Arc<Connection>| requestor.fail_all_for_conn(conn.id()))
    }

    fn install(&self, conn: ConnectionId, request: Message, slot: ResponseSlot) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(request.id().to_string(), PendingEntry { conn, request, slot });
    }

    fn discard(&self, id: &str) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(id);
    }
}

fn deliver(slot: ResponseSlot, result: ResponseResult) {
    match slot {
        ResponseSlot::Channel(tx) => {
            // The waiter may have given up; nothing to do then.
            let _ = tx.send(result);
        }
        ResponseSlot::Callback(callback) => callback(result),
    }
}

/// Handle for an in-flight request.
///
/// Await [`PendingResponse::wait`] from an application task only: waiting on
/// the task that drains the same connection would deadlock, since delivery
/// needs that task to keep reading.
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<ResponseResult>,
    requestor: Requestor,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the response. On timeout the descriptor is removed, so a
    /// straggler response is dropped rather than delivered twice.
    pub async fn wait(self, timeout: Duration) -> Result<Message, PatchbayError> {
        match time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PatchbayError::Disconnected),
            Err(_) => {
                self.requestor.discard(&self.id);
                Err(PatchbayError::Timeout { timeout })
            }
        }
    }
}
