//! services/chat/src/lib.rs
//!
//! Library crate for the chat service: configuration, the persona
//! registry, the port adapters, and the session orchestration layer.

pub mod adapters;
pub mod agents;
pub mod config;
pub mod error;
pub mod session;

#[cfg(test)]
pub mod testutil;
