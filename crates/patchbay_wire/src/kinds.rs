//! Closed enum sets that travel on the wire.
//!
//! Numeric encodings are stable dense sequences starting at 0; peers on other
//! runtimes depend on them, so variants must never be reordered.

/// Message kind carried in the frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageKind {
    ReqRpc,
    RspRpc,
    ReqTopic,
    RspTopic,
    ReqService,
    RspService,
}

impl MessageKind {
    pub const fn code(self) -> u32 {
        match self {
            MessageKind::ReqRpc => 0,
            MessageKind::RspRpc => 1,
            MessageKind::ReqTopic => 2,
            MessageKind::RspTopic => 3,
            MessageKind::ReqService => 4,
            MessageKind::RspService => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(MessageKind::ReqRpc),
            1 => Some(MessageKind::RspRpc),
            2 => Some(MessageKind::ReqTopic),
            3 => Some(MessageKind::RspTopic),
            4 => Some(MessageKind::ReqService),
            5 => Some(MessageKind::RspService),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::ReqRpc => "REQ_RPC",
            MessageKind::RspRpc => "RSP_RPC",
            MessageKind::ReqTopic => "REQ_TOPIC",
            MessageKind::RspTopic => "RSP_TOPIC",
            MessageKind::ReqService => "REQ_SERVICE",
            MessageKind::RspService => "RSP_SERVICE",
        }
    }

    /// Whether this kind is a request (the peer is expected to answer it).
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            MessageKind::ReqRpc | MessageKind::ReqTopic | MessageKind::ReqService
        )
    }

    /// The response kind that answers this request kind, sharing its id.
    pub const fn response_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::ReqRpc => Some(MessageKind::RspRpc),
            MessageKind::ReqTopic => Some(MessageKind::RspTopic),
            MessageKind::ReqService => Some(MessageKind::RspService),
            _ => None,
        }
    }
}

/// Result code carried in the `rcode` body field of every response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResponseCode {
    Ok,
    ParseFailed,
    ErrorMsgType,
    InvalidMsg,
    Disconnected,
    InvalidParams,
    NotFoundService,
    InvalidOptype,
    NotFoundTopic,
    InternalError,
}

impl ResponseCode {
    pub const fn code(self) -> i64 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::ParseFailed => 1,
            ResponseCode::ErrorMsgType => 2,
            ResponseCode::InvalidMsg => 3,
            ResponseCode::Disconnected => 4,
            ResponseCode::InvalidParams => 5,
            ResponseCode::NotFoundService => 6,
            ResponseCode::InvalidOptype => 7,
            ResponseCode::NotFoundTopic => 8,
            ResponseCode::InternalError => 9,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ResponseCode::Ok),
            1 => Some(ResponseCode::ParseFailed),
            2 => Some(ResponseCode::ErrorMsgType),
            3 => Some(ResponseCode::InvalidMsg),
            4 => Some(ResponseCode::Disconnected),
            5 => Some(ResponseCode::InvalidParams),
            6 => Some(ResponseCode::NotFoundService),
            7 => Some(ResponseCode::InvalidOptype),
            8 => Some(ResponseCode::NotFoundTopic),
            9 => Some(ResponseCode::InternalError),
            _ => None,
        }
    }

    /// Human-readable reason, for logs and error displays.
    pub const fn reason(self) -> &'static str {
        match self {
            ResponseCode::Ok => "ok",
            ResponseCode::ParseFailed => "message parsing failed",
            ResponseCode::ErrorMsgType => "wrong message type",
            ResponseCode::InvalidMsg => "invalid message",
            ResponseCode::Disconnected => "connection closed",
            ResponseCode::InvalidParams => "invalid rpc parameters",
            ResponseCode::NotFoundService => "no such service",
            ResponseCode::InvalidOptype => "invalid operation type",
            ResponseCode::NotFoundTopic => "no such topic",
            ResponseCode::InternalError => "internal error",
        }
    }
}

/// Operation carried by REQ_TOPIC messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TopicAction {
    Create,
    Remove,
    Subscribe,
    Cancel,
    Publish,
}

impl TopicAction {
    pub const fn code(self) -> i64 {
        match self {
            TopicAction::Create => 0,
            TopicAction::Remove => 1,
            TopicAction::Subscribe => 2,
            TopicAction::Cancel => 3,
            TopicAction::Publish => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TopicAction::Create),
            1 => Some(TopicAction::Remove),
            2 => Some(TopicAction::Subscribe),
            3 => Some(TopicAction::Cancel),
            4 => Some(TopicAction::Publish),
            _ => None,
        }
    }
}

/// Operation carried by REQ_SERVICE and RSP_SERVICE messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceAction {
    Registry,
    Online,
    Offline,
    Discovery,
    Unknown,
}

impl ServiceAction {
    pub const fn code(self) -> i64 {
        match self {
            ServiceAction::Registry => 0,
            ServiceAction::Online => 1,
            ServiceAction::Offline => 2,
            ServiceAction::Discovery => 3,
            ServiceAction::Unknown => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ServiceAction::Registry),
            1 => Some(ServiceAction::Online),
            2 => Some(ServiceAction::Offline),
            3 => Some(ServiceAction::Discovery),
            4 => Some(ServiceAction::Unknown),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for code in 0..6 {
            let kind = MessageKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(MessageKind::from_code(6).is_none());
    }

    #[test]
    fn request_kinds_pair_with_responses() {
        assert_eq!(
            MessageKind::ReqRpc.response_kind(),
            Some(MessageKind::RspRpc)
        );
        assert_eq!(
            MessageKind::ReqService.response_kind(),
            Some(MessageKind::RspService)
        );
        assert_eq!(
            MessageKind::ReqTopic.response_kind(),
            Some(MessageKind::RspTopic)
        );
        assert!(MessageKind::RspRpc.response_kind().is_none());
        assert!(!MessageKind::RspTopic.is_request());
    }

    #[test]
    fn rcode_encoding_is_dense_from_zero() {
        for code in 0..10 {
            let rc = ResponseCode::from_code(code).unwrap();
            assert_eq!(rc.code(), code);
        }
        assert!(ResponseCode::from_code(10).is_none());
    }
}
