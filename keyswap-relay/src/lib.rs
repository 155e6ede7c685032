//! Keyswap relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay server accepts WebSocket connections, pairs them two at a time
//! under a room name, swaps their public keys, and forwards chat messages
//! between them.

pub mod config;
pub mod relay;
pub mod rooms;
