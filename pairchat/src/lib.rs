//! `PairChat` — real-time pairwise chat client.
//!
//! The [`chat::ChatSurface`] owns all chat state of one session and is
//! driven by a single event loop. It talks to the server through two seams:
//! a [`channel::Connector`] for the push channel and a
//! [`service::ChatService`] for request/response calls.

pub mod channel;
pub mod chat;
pub mod config;
pub mod connection;
pub mod service;
pub mod session;
