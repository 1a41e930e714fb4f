//! Concrete message types and the polymorphic [`Message`] sum.
//!
//! Every message is an opaque string id plus a JSON body. Bodies are plain
//! [`serde_json::Value`] trees built with `json!` and read through typed
//! accessors, so a peer can always be answered even when a body is only
//! partially well-formed. [`Message::validate`] is the total predicate the
//! dispatch layer runs before any handler sees the message.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::kinds::{MessageKind, ResponseCode, ServiceAction, TopicAction};

/// Body field names, shared with non-Rust peers.
pub mod fields {
    pub const METHOD: &str = "method";
    pub const PARAMS: &str = "parameters";
    pub const TOPIC_KEY: &str = "topic_key";
    pub const TOPIC_MSG: &str = "topic_msg";
    pub const OPTYPE: &str = "optype";
    pub const HOST: &str = "host";
    pub const HOST_IP: &str = "ip";
    pub const HOST_PORT: &str = "port";
    pub const RCODE: &str = "rcode";
    pub const RESULT: &str = "result";
}

/// A provider's listening endpoint, serialized as `{"ip": …, "port": …}`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    pub ip: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ fields::HOST_IP: self.ip, fields::HOST_PORT: self.port })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let ip = value.get(fields::HOST_IP)?.as_str()?;
        let port = u16::try_from(value.get(fields::HOST_PORT)?.as_i64()?).ok()?;
        Some(Self::new(ip, port))
    }

    fn is_host_object(value: &Value) -> bool {
        value.is_object()
            && value.get(fields::HOST_IP).is_some_and(Value::is_string)
            && value.get(fields::HOST_PORT).is_some_and(is_integral)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

fn is_integral(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

fn body_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

fn body_i64(body: &Value, key: &str) -> Option<i64> {
    body.get(key).and_then(Value::as_i64)
}

macro_rules! message_common {
    ($ty:ident) => {
        impl $ty {
            pub(crate) fn from_parts(id: String, body: Value) -> Self {
                Self { id, body }
            }

            pub fn id(&self) -> &str {
                &self.id
            }

            pub fn set_id(&mut self, id: impl Into<String>) {
                self.id = id.into();
            }

            pub fn with_id(mut self, id: impl Into<String>) -> Self {
                self.id = id.into();
                self
            }

            pub fn body(&self) -> &Value {
                &self.body
            }
        }
    };
}

/// RPC invocation: a method name plus a parameter object.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcRequest {
    id: String,
    body: Value,
}

message_common!(RpcRequest);

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            id: String::new(),
            body: json!({ fields::METHOD: method, fields::PARAMS: params }),
        }
    }

    pub fn method(&self) -> Option<&str> {
        body_str(&self.body, fields::METHOD)
    }

    pub fn params(&self) -> Option<&Value> {
        self.body.get(fields::PARAMS)
    }

    pub fn validate(&self) -> bool {
        self.method().is_some() && self.params().is_some_and(Value::is_object)
    }
}

/// Answer to an [`RpcRequest`], carrying the result value of the call.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResponse {
    id: String,
    body: Value,
}

message_common!(RpcResponse);

impl RpcResponse {
    pub fn new(id: &str, code: ResponseCode, result: Value) -> Self {
        Self {
            id: id.to_string(),
            body: json!({ fields::RCODE: code.code(), fields::RESULT: result }),
        }
    }

    pub fn code(&self) -> Option<ResponseCode> {
        body_i64(&self.body, fields::RCODE).and_then(ResponseCode::from_code)
    }

    pub fn result(&self) -> Option<&Value> {
        self.body.get(fields::RESULT)
    }

    pub fn validate(&self) -> bool {
        self.body.get(fields::RCODE).is_some_and(is_integral) && self.result().is_some()
    }
}

/// Topic operation: create/remove/subscribe/cancel, or a publish carrying a payload.
///
/// PUBLISH plays a double role: it is a request when a publisher sends it to
/// the broker and a push when the broker forwards it verbatim to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct TopicRequest {
    id: String,
    body: Value,
}

message_common!(TopicRequest);

impl TopicRequest {
    pub fn new(action: TopicAction, key: &str) -> Self {
        Self {
            id: String::new(),
            body: json!({ fields::TOPIC_KEY: key, fields::OPTYPE: action.code() }),
        }
    }

    pub fn publish(key: &str, payload: &str) -> Self {
        Self {
            id: String::new(),
            body: json!({
                fields::TOPIC_KEY: key,
                fields::OPTYPE: TopicAction::Publish.code(),
                fields::TOPIC_MSG: payload,
            }),
        }
    }

    pub fn topic_key(&self) -> Option<&str> {
        body_str(&self.body, fields::TOPIC_KEY)
    }

    pub fn action(&self) -> Option<TopicAction> {
        body_i64(&self.body, fields::OPTYPE).and_then(TopicAction::from_code)
    }

    pub fn payload(&self) -> Option<&str> {
        body_str(&self.body, fields::TOPIC_MSG)
    }

    pub fn validate(&self) -> bool {
        if self.topic_key().is_none() {
            return false;
        }
        let Some(optype) = self.body.get(fields::OPTYPE) else {
            return false;
        };
        if !is_integral(optype) {
            return false;
        }
        if optype.as_i64() == Some(TopicAction::Publish.code()) {
            return self.payload().is_some();
        }
        true
    }
}

/// Answer to a [`TopicRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct TopicResponse {
    id: String,
    body: Value,
}

message_common!(TopicResponse);

impl TopicResponse {
    pub fn new(id: &str, code: ResponseCode) -> Self {
        Self {
            id: id.to_string(),
            body: json!({ fields::RCODE: code.code() }),
        }
    }

    pub fn code(&self) -> Option<ResponseCode> {
        body_i64(&self.body, fields::RCODE).and_then(ResponseCode::from_code)
    }

    pub fn validate(&self) -> bool {
        self.body.get(fields::RCODE).is_some_and(is_integral)
    }
}

/// Registry operation: registration, discovery, or an online/offline notice.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRequest {
    id: String,
    body: Value,
}

message_common!(ServiceRequest);

impl ServiceRequest {
    pub fn registry(method: &str, host: &HostAddress) -> Self {
        Self::with_host(ServiceAction::Registry, method, host)
    }

    pub fn discovery(method: &str) -> Self {
        Self {
            id: String::new(),
            body: json!({
                fields::METHOD: method,
                fields::OPTYPE: ServiceAction::Discovery.code(),
            }),
        }
    }

    /// Online/offline notice pushed by the registry to discoverers.
    pub fn notice(action: ServiceAction, method: &str, host: &HostAddress) -> Self {
        Self::with_host(action, method, host)
    }

    fn with_host(action: ServiceAction, method: &str, host: &HostAddress) -> Self {
        Self {
            id: String::new(),
            body: json!({
                fields::METHOD: method,
                fields::OPTYPE: action.code(),
                fields::HOST: host.to_value(),
            }),
        }
    }

    pub fn method(&self) -> Option<&str> {
        body_str(&self.body, fields::METHOD)
    }

    pub fn action(&self) -> Option<ServiceAction> {
        body_i64(&self.body, fields::OPTYPE).and_then(ServiceAction::from_code)
    }

    pub fn host(&self) -> Option<HostAddress> {
        self.body.get(fields::HOST).and_then(HostAddress::from_value)
    }

    pub fn validate(&self) -> bool {
        if self.method().is_none() {
            return false;
        }
        let Some(optype) = body_i64(&self.body, fields::OPTYPE) else {
            return false;
        };
        if optype == ServiceAction::Discovery.code() {
            return true;
        }
        self.body
            .get(fields::HOST)
            .is_some_and(HostAddress::is_host_object)
    }
}

/// Answer to a [`ServiceRequest`]; discovery answers carry the provider list.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceResponse {
    id: String,
    body: Value,
}

message_common!(ServiceResponse);

impl ServiceResponse {
    pub fn ack(id: &str, action: ServiceAction, code: ResponseCode) -> Self {
        Self {
            id: id.to_string(),
            body: json!({ fields::RCODE: code.code(), fields::OPTYPE: action.code() }),
        }
    }

    pub fn discovery(id: &str, code: ResponseCode, method: &str, hosts: &[HostAddress]) -> Self {
        let hosts: Vec<Value> = hosts.iter().map(HostAddress::to_value).collect();
        Self {
            id: id.to_string(),
            body: json!({
                fields::RCODE: code.code(),
                fields::OPTYPE: ServiceAction::Discovery.code(),
                fields::METHOD: method,
                fields::HOST: hosts,
            }),
        }
    }

    pub fn code(&self) -> Option<ResponseCode> {
        body_i64(&self.body, fields::RCODE).and_then(ResponseCode::from_code)
    }

    pub fn action(&self) -> Option<ServiceAction> {
        body_i64(&self.body, fields::OPTYPE).and_then(ServiceAction::from_code)
    }

    pub fn method(&self) -> Option<&str> {
        body_str(&self.body, fields::METHOD)
    }

    /// Provider addresses in a discovery answer; malformed entries are skipped.
    pub fn hosts(&self) -> Vec<HostAddress> {
        self.body
            .get(fields::HOST)
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(HostAddress::from_value).collect())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> bool {
        if !self.body.get(fields::RCODE).is_some_and(is_integral) {
            return false;
        }
        let Some(optype) = body_i64(&self.body, fields::OPTYPE) else {
            return false;
        };
        if optype == ServiceAction::Discovery.code() {
            return self.method().is_some()
                && self.body.get(fields::HOST).is_some_and(Value::is_array);
        }
        true
    }
}

/// The polymorphic message: one variant per wire kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    RpcRequest(RpcRequest),
    RpcResponse(RpcResponse),
    TopicRequest(TopicRequest),
    TopicResponse(TopicResponse),
    ServiceRequest(ServiceRequest),
    ServiceResponse(ServiceResponse),
}

macro_rules! for_each_variant {
    ($self:expr, $inner:ident => $expr:expr) => {
        match $self {
            Message::RpcRequest($inner) => $expr,
            Message::RpcResponse($inner) => $expr,
            Message::TopicRequest($inner) => $expr,
            Message::TopicResponse($inner) => $expr,
            Message::ServiceRequest($inner) => $expr,
            Message::ServiceResponse($inner) => $expr,
        }
    };
}

impl Message {
    /// Rebuild a message from decoded frame parts.
    pub fn from_parts(kind: MessageKind, id: String, body: Value) -> Self {
        match kind {
            MessageKind::ReqRpc => Message::RpcRequest(RpcRequest::from_parts(id, body)),
            MessageKind::RspRpc => Message::RpcResponse(RpcResponse::from_parts(id, body)),
            MessageKind::ReqTopic => Message::TopicRequest(TopicRequest::from_parts(id, body)),
            MessageKind::RspTopic => Message::TopicResponse(TopicResponse::from_parts(id, body)),
            MessageKind::ReqService => {
                Message::ServiceRequest(ServiceRequest::from_parts(id, body))
            }
            MessageKind::RspService => {
                Message::ServiceResponse(ServiceResponse::from_parts(id, body))
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RpcRequest(_) => MessageKind::ReqRpc,
            Message::RpcResponse(_) => MessageKind::RspRpc,
            Message::TopicRequest(_) => MessageKind::ReqTopic,
            Message::TopicResponse(_) => MessageKind::RspTopic,
            Message::ServiceRequest(_) => MessageKind::ReqService,
            Message::ServiceResponse(_) => MessageKind::RspService,
        }
    }

    pub fn id(&self) -> &str {
        for_each_variant!(self, inner => inner.id())
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        for_each_variant!(self, inner => inner.set_id(id))
    }

    pub fn body(&self) -> &Value {
        for_each_variant!(self, inner => inner.body())
    }

    /// Total validation predicate for this message's kind.
    pub fn validate(&self) -> bool {
        for_each_variant!(self, inner => inner.validate())
    }

    /// The body as JSON text, as it travels on the wire.
    pub fn serialize_body(&self) -> String {
        self.body().to_string()
    }
}

/// Extraction of a concrete message type from the sum, used by typed dispatch.
pub trait FromMessage: Sized + Into<Message> {
    const KIND: MessageKind;

    fn from_message(msg: Message) -> Option<Self>;
}

macro_rules! impl_from_message {
    ($ty:ident, $kind:expr) => {
        impl From<$ty> for Message {
            fn from(inner: $ty) -> Message {
                Message::$ty(inner)
            }
        }

        impl FromMessage for $ty {
            const KIND: MessageKind = $kind;

            fn from_message(msg: Message) -> Option<Self> {
                match msg {
                    Message::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_from_message!(RpcRequest, MessageKind::ReqRpc);
impl_from_message!(RpcResponse, MessageKind::RspRpc);
impl_from_message!(TopicRequest, MessageKind::ReqTopic);
impl_from_message!(TopicResponse, MessageKind::RspTopic);
impl_from_message!(ServiceRequest, MessageKind::ReqService);
impl_from_message!(ServiceResponse, MessageKind::RspService);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_request_validation() {
        let ok = RpcRequest::new("Add", json!({ "num1": 1, "num2": 2 }));
        assert!(ok.validate());

        let missing_params = RpcRequest::from_parts(String::new(), json!({ "method": "Add" }));
        assert!(!missing_params.validate());

        let params_not_object = RpcRequest::from_parts(
            String::new(),
            json!({ "method": "Add", "parameters": [1, 2] }),
        );
        assert!(!params_not_object.validate());
    }

    #[test]
    fn rpc_response_requires_rcode_and_result() {
        let ok = RpcResponse::new("id-1", ResponseCode::Ok, json!(100));
        assert!(ok.validate());
        assert_eq!(ok.code(), Some(ResponseCode::Ok));
        assert_eq!(ok.result(), Some(&json!(100)));

        let missing_result =
            RpcResponse::from_parts("id-1".into(), json!({ "rcode": 0 }));
        assert!(!missing_result.validate());
    }

    #[test]
    fn topic_publish_requires_payload() {
        let publish = TopicRequest::publish("hello", "world");
        assert!(publish.validate());
        assert_eq!(publish.payload(), Some("world"));

        let bare = TopicRequest::from_parts(
            String::new(),
            json!({ "topic_key": "hello", "optype": TopicAction::Publish.code() }),
        );
        assert!(!bare.validate());

        let subscribe = TopicRequest::new(TopicAction::Subscribe, "hello");
        assert!(subscribe.validate());
        assert_eq!(subscribe.payload(), None);
    }

    #[test]
    fn service_request_host_is_conditional() {
        let host = HostAddress::new("127.0.0.1", 9090);
        assert!(ServiceRequest::registry("Add", &host).validate());
        assert!(ServiceRequest::discovery("Add").validate());

        let registry_without_host = ServiceRequest::from_parts(
            String::new(),
            json!({ "method": "Add", "optype": ServiceAction::Registry.code() }),
        );
        assert!(!registry_without_host.validate());
    }

    #[test]
    fn service_discovery_response_carries_hosts() {
        let hosts = vec![
            HostAddress::new("127.0.0.1", 9090),
            HostAddress::new("127.0.0.1", 9091),
        ];
        let rsp = ServiceResponse::discovery("id-2", ResponseCode::Ok, "Add", &hosts);
        assert!(rsp.validate());
        assert_eq!(rsp.hosts(), hosts);
        assert_eq!(rsp.method(), Some("Add"));

        let missing_hosts = ServiceResponse::from_parts(
            "id-2".into(),
            json!({ "rcode": 0, "optype": ServiceAction::Discovery.code(), "method": "Add" }),
        );
        assert!(!missing_hosts.validate());

        let plain_ack = ServiceResponse::ack("id-3", ServiceAction::Registry, ResponseCode::Ok);
        assert!(plain_ack.validate());
        assert!(plain_ack.hosts().is_empty());
    }

    #[test]
    fn sum_preserves_kind_and_id() {
        let mut msg: Message = RpcRequest::new("Add", json!({})).into();
        msg.set_id("abc");
        assert_eq!(msg.kind(), MessageKind::ReqRpc);
        assert_eq!(msg.id(), "abc");

        let back = RpcRequest::from_message(msg.clone()).unwrap();
        assert_eq!(back.id(), "abc");
        assert!(TopicRequest::from_message(msg).is_none());
    }
}
