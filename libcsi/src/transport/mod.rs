//! Unix-socket transport layer for CSI messages.
//!
//! This module provides [`CsiClient`] and [`CsiServer`] that exchange
//! [`CsiMessage`](crate::CsiMessage) values over a local Unix domain socket.
//! Every connection carries one JSON request, terminated by the client
//! shutting down its write half, and one JSON response terminated by EOF.

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::CsiServer;

/// Upper bound on a single encoded message.
pub(crate) const MAX_MESSAGE_BYTES: u64 = 16 * 1024 * 1024;
