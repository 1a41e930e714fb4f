//! Kind-indexed message dispatch.
//!
//! One handler per [`MessageKind`]. Registration is typed: the handler
//! receives the concrete message struct for its kind, extracted from the
//! [`Message`] sum at dispatch time. The frame codec guarantees kind and
//! variant agree, so a failed extraction means a peer (or a local bug) is
//! lying about kinds and the connection is closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use patchbay_wire::{
    FromMessage, Message, MessageKind, ResponseCode, RpcResponse, ServiceAction, ServiceResponse,
    TopicResponse,
};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::net::Connection;

type Handler = Arc<dyn Fn(&Arc<Connection>, Message) + Send + Sync>;

/// Routes each inbound message to the one handler registered for its kind.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<HashMap<MessageKind, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `T`'s kind. A second registration for the
    /// same kind is a no-op.
    pub fn register<T, F>(&self, handler: F)
    where
        T: FromMessage + 'static,
        F: Fn(&Arc<Connection>, T) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().expect("handler map lock poisoned");
        if handlers.contains_key(&T::KIND) {
            debug!(kind = T::KIND.as_str(), "handler already registered, ignoring");
            return;
        }
        handlers.insert(
            T::KIND,
            Arc::new(move |conn, msg| match T::from_message(msg) {
                Some(typed) => handler(conn, typed),
                None => {
                    error!(
                        conn = conn.id(),
                        kind = T::KIND.as_str(),
                        "message kind does not match its payload, closing"
                    );
                    conn.shutdown();
                }
            }),
        );
    }

    /// Validates and routes one decoded message.
    pub fn dispatch(&self, conn: &Arc<Connection>, msg: Message) {
        if !msg.validate() {
            reject_invalid(conn, &msg);
            return;
        }

        let handler = self
            .handlers
            .lock()
            .expect("handler map lock poisoned")
            .get(&msg.kind())
            .cloned();
        match handler {
            Some(handler) => handler(conn, msg),
            None => {
                error!(
                    conn = conn.id(),
                    kind = msg.kind().as_str(),
                    "no handler for message kind, closing"
                );
                conn.shutdown();
            }
        }
    }
}

/// Answers an invalid request with INVALID_MSG; invalid responses are dropped.
fn reject_invalid(conn: &Arc<Connection>, msg: &Message) {
    warn!(
        conn = conn.id(),
        kind = msg.kind().as_str(),
        id = msg.id(),
        "message failed validation"
    );
    let reply: Option<Message> = match msg.kind() {
        MessageKind::ReqRpc => {
            Some(RpcResponse::new(msg.id(), ResponseCode::InvalidMsg, Value::Null).into())
        }
        MessageKind::ReqTopic => Some(TopicResponse::new(msg.id(), ResponseCode::InvalidMsg).into()),
        MessageKind::ReqService => {
            Some(ServiceResponse::ack(msg.id(), ServiceAction::Unknown, ResponseCode::InvalidMsg).into())
        }
        _ => None,
    };
    if let Some(reply) = reply {
        if let Err(err) = conn.send(reply) {
            debug!(conn = conn.id(), %err, "could not answer invalid message");
        }
    }
}
