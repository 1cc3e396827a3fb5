//! Protocol implementations.
//!
//! - `resp`: Redis RESP request encoding and frame parsing

pub mod resp;
