//! Service: the caller-side turn driver.
//!
//! Owns the conversation log writes around a turn: the user message before
//! the tool phase, tool traffic after it, and the assistant reply once the
//! final stream has been read to the end.

pub mod chat;

pub use chat::{ChatRequest, ChatService, TurnStream};
