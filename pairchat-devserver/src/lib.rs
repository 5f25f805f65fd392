//! `PairChat` development server library.
//!
//! Exposes the server for use in tests and embedding. It speaks the chat
//! channel protocol over WebSocket and serves the request API, keeping all
//! users and conversations in memory.

pub mod config;
pub mod server;
pub mod state;
