//! Shared wire definitions for the `PairChat` channel and request API.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;
pub mod user;
