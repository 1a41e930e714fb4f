//! Topic broker: the server side of publish/subscribe.
//!
//! Two indexes are kept consistent under one lock: topic name → subscriber
//! connections, and connection → subscribed topic names. PUBLISH is forwarded
//! verbatim (same id, same body) to the subscriber snapshot taken under the
//! lock, so a subscriber arriving mid-publish sees either all or none of it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use patchbay_wire::{ResponseCode, TopicAction, TopicRequest, TopicResponse};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::net::{CloseHook, Connection, ConnectionId};

struct SubscriberEntry {
    conn: Arc<Connection>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, HashSet<ConnectionId>>,
    subscribers: HashMap<ConnectionId, SubscriberEntry>,
}

/// The broker's REQ_TOPIC state machine.
#[derive(Default)]
pub struct PsManager {
    state: Mutex<BrokerState>,
}

impl PsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher handler for REQ_TOPIC.
    pub fn on_request(&self, conn: &Arc<Connection>, req: TopicRequest) {
        let key = req.topic_key().unwrap_or_default().to_string();
        let code = match req.action() {
            Some(TopicAction::Create) => self.create(&key),
            Some(TopicAction::Remove) => self.remove(&key),
            Some(TopicAction::Subscribe) => self.subscribe(conn, &key),
            Some(TopicAction::Cancel) => self.cancel(conn.id(), &key),
            Some(TopicAction::Publish) => self.publish(&key, &req),
            None => {
                warn!(conn = conn.id(), "topic request with invalid optype");
                ResponseCode::InvalidOptype
            }
        };
        let reply = TopicResponse::new(req.id(), code);
        if let Err(err) = conn.send(reply.into()) {
            debug!(conn = conn.id(), %err, "could not send topic response");
        }
    }

    /// Close path: detach the subscriber from every topic it followed, then
    /// drop its record.
    pub fn on_close(&self, conn: &Arc<Connection>) {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        let Some(entry) = state.subscribers.remove(&conn.id()) else {
            return;
        };
        for topic in &entry.topics {
            if let Some(subscribers) = state.topics.get_mut(topic) {
                subscribers.remove(&conn.id());
            }
        }
        debug!(conn = conn.id(), topics = entry.topics.len(), "subscriber disconnected");
    }

    /// Wires this broker into a dispatcher.
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let broker = self.clone();
        dispatcher.register(move |conn: &Arc<Connection>, req: TopicRequest| {
            broker.on_request(conn, req);
        });
    }

    pub fn close_hook(self: &Arc<Self>) -> CloseHook {
        let broker = self.clone();
        Arc::new(move |conn: &Arc<Connection>| broker.on_close(conn))
    }

    fn create(&self, key: &str) -> ResponseCode {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        if !state.topics.contains_key(key) {
            state.topics.insert(key.to_string(), HashSet::new());
            info!(topic = key, "topic created");
        }
        ResponseCode::Ok
    }

    /// Removing an absent topic is still OK; removal erases the topic from
    /// every subscriber's set before dropping the topic itself.
    fn remove(&self, key: &str) -> ResponseCode {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        if let Some(subscribers) = state.topics.remove(key) {
            for conn in subscribers {
                if let Some(entry) = state.subscribers.get_mut(&conn) {
                    entry.topics.remove(key);
                }
            }
            info!(topic = key, "topic removed");
        }
        ResponseCode::Ok
    }

    fn subscribe(&self, conn: &Arc<Connection>, key: &str) -> ResponseCode {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        if !state.topics.contains_key(key) {
            return ResponseCode::NotFoundTopic;
        }
        state
            .subscribers
            .entry(conn.id())
            .or_insert_with(|| SubscriberEntry {
                conn: conn.clone(),
                topics: HashSet::new(),
            })
            .topics
            .insert(key.to_string());
        if let Some(subscribers) = state.topics.get_mut(key) {
            subscribers.insert(conn.id());
        }
        debug!(conn = conn.id(), topic = key, "subscribed");
        ResponseCode::Ok
    }

    fn cancel(&self, conn: ConnectionId, key: &str) -> ResponseCode {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        if let Some(entry) = state.subscribers.get_mut(&conn) {
            entry.topics.remove(key);
        }
        if let Some(subscribers) = state.topics.get_mut(key) {
            subscribers.remove(&conn);
        }
        ResponseCode::Ok
    }

    /// Fan-out is best-effort and synchronous: one failing subscriber send
    /// neither aborts the others nor changes the publisher's rcode.
    fn publish(&self, key: &str, req: &TopicRequest) -> ResponseCode {
        let targets: Vec<Arc<Connection>> = {
            let state = self.state.lock().expect("broker state lock poisoned");
            let Some(subscribers) = state.topics.get(key) else {
                return ResponseCode::NotFoundTopic;
            };
            subscribers
                .iter()
                .filter_map(|conn| state.subscribers.get(conn))
                .map(|entry| entry.conn.clone())
                .collect()
        };

        for conn in targets {
            if let Err(err) = conn.send(req.clone().into()) {
                debug!(conn = conn.id(), topic = key, %err, "subscriber send failed");
            }
        }
        ResponseCode::Ok
    }
}
