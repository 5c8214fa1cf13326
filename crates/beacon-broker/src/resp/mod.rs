//! RESP (REdis Serialization Protocol) transport.

pub mod client;
pub mod codec;

pub use client::{RespConnection, RespPublisher, RespSubscriber};
pub use codec::{RespCodec, RespValue};
