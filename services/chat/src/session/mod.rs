//! services/chat/src/session/mod.rs
//!
//! The session orchestration layer: shared state and events, the active
//! conversation manager, the specialization dispatch engine, reminder
//! scheduling, and the auth-driven session lifecycle.

pub mod chat;
pub mod dispatch;
pub mod lifecycle;
pub mod reminders;
pub mod state;

pub use chat::{BlockStatus, ChatManager, Counterpart, ImageUpload};
pub use dispatch::DispatchEngine;
pub use lifecycle::SessionController;
pub use reminders::{ReminderLoop, ReminderStore};
pub use state::{AudioGate, ChatEvent, PlaybackAction, Services};
