//! Shared wire definitions for the keyswap relay.
//!
//! Every frame crossing the relay, in either direction, is a small JSON
//! record with a `status` and a `text` field.

pub mod codec;
pub mod message;
