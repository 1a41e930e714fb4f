#![forbid(unsafe_code)]
//! Wire protocol shared by every patchbay peer.
//!
//! Frames are length-value: `| total_len | kind | id_len | id | body |` with
//! big-endian 4-byte integers and a UTF-8 JSON body. This crate owns the frame
//! codec ([`LvCodec`]), the closed set of message kinds and operation enums,
//! and the six concrete message types with their validation predicates. It
//! knows nothing about sockets or dispatch; the runtime crate layers those on
//! top.

mod codec;
mod kinds;
mod message;

pub use codec::{LvCodec, WireError, DEFAULT_MAX_BUFFER};
pub use kinds::{MessageKind, ResponseCode, ServiceAction, TopicAction};
pub use message::{
    fields, FromMessage, HostAddress, Message, RpcRequest, RpcResponse, ServiceRequest,
    ServiceResponse, TopicRequest, TopicResponse,
};
