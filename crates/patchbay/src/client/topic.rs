//! Client-side topic state: subscription callbacks and the broker request
//! helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay_wire::{FromMessage, ResponseCode, TopicAction, TopicRequest, TopicResponse};
use tracing::{debug, warn};

use crate::error::PatchbayError;
use crate::net::Connection;
use crate::requestor::Requestor;

/// Invoked for every message pushed on a subscribed topic, as
/// `callback(topic_key, payload)`.
pub type SubscribeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Mirrors the broker from the client side: sends topic operations through
/// the requestor and dispatches inbound PUBLISH pushes to the callback
/// registered per topic.
pub(crate) struct TopicManager {
    requestor: Requestor,
    callbacks: Mutex<HashMap<String, SubscribeCallback>>,
    response_timeout: Duration,
}

impl TopicManager {
    pub(crate) fn new(requestor: Requestor, response_timeout: Duration) -> Self {
        Self {
            requestor,
            callbacks: Mutex::new(HashMap::new()),
            response_timeout,
        }
    }

    pub(crate) async fn create(
        &self,
        conn: &Arc<Connection>,
        key: &str,
    ) -> Result<(), PatchbayError> {
        self.request(conn, TopicRequest::new(TopicAction::Create, key))
            .await
    }

    pub(crate) async fn remove(
        &self,
        conn: &Arc<Connection>,
        key: &str,
    ) -> Result<(), PatchbayError> {
        self.request(conn, TopicRequest::new(TopicAction::Remove, key))
            .await
    }

    /// The callback is installed before SUBSCRIBE is sent, so a push racing
    /// the acknowledgement still finds it; a failed subscribe rolls the
    /// installation back.
    pub(crate) async fn subscribe(
        &self,
        conn: &Arc<Connection>,
        key: &str,
        callback: SubscribeCallback,
    ) -> Result<(), PatchbayError> {
        self.callbacks
            .lock()
            .expect("topic callback lock poisoned")
            .entry(key.to_string())
            .or_insert(callback);
        let result = self
            .request(conn, TopicRequest::new(TopicAction::Subscribe, key))
            .await;
        if result.is_err() {
            self.callbacks
                .lock()
                .expect("topic callback lock poisoned")
                .remove(key);
        }
        result
    }

    pub(crate) async fn cancel(
        &self,
        conn: &Arc<Connection>,
        key: &str,
    ) -> Result<(), PatchbayError> {
        self.callbacks
            .lock()
            .expect("topic callback lock poisoned")
            .remove(key);
        self.request(conn, TopicRequest::new(TopicAction::Cancel, key))
            .await
    }

    pub(crate) async fn publish(
        &self,
        conn: &Arc<Connection>,
        key: &str,
        payload: &str,
    ) -> Result<(), PatchbayError> {
        self.request(conn, TopicRequest::publish(key, payload)).await
    }

    /// Dispatcher handler for inbound REQ_TOPIC pushes from the broker.
    pub(crate) fn on_publish(&self, _conn: &Arc<Connection>, req: TopicRequest) {
        if req.action() != Some(TopicAction::Publish) {
            warn!(kind = "REQ_TOPIC", "unexpected non-publish push, dropping");
            return;
        }
        let (Some(key), Some(payload)) = (req.topic_key(), req.payload()) else {
            warn!("publish push missing key or payload, dropping");
            return;
        };
        let callback = self
            .callbacks
            .lock()
            .expect("topic callback lock poisoned")
            .get(key)
            .cloned();
        match callback {
            Some(callback) => callback(key, payload),
            None => debug!(topic = key, "push for unsubscribed topic, dropping"),
        }
    }

    async fn request(
        &self,
        conn: &Arc<Connection>,
        req: TopicRequest,
    ) -> Result<(), PatchbayError> {
        let pending = self.requestor.send(conn, req.into())?;
        let msg = pending.wait(self.response_timeout).await?;
        let rsp = TopicResponse::from_message(msg)
            .ok_or(PatchbayError::MalformedResponse("expected RSP_TOPIC"))?;
        match rsp.code() {
            Some(ResponseCode::Ok) => Ok(()),
            Some(code) => Err(PatchbayError::Response { code }),
            None => Err(PatchbayError::MalformedResponse("unknown rcode")),
        }
    }
}
