//! RESP (Redis Serialization Protocol) implementation.
//!
//! `command` builds the SET/GET requests workers send; `parser` models RESP
//! frames for the mock target and for decoding requests in tests.

pub mod command;
pub mod parser;

pub use command::Command;
pub use parser::{parse, Frame, ParseResult};
