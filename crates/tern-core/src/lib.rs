//! # tern-core
//!
//! Core types for the Tern terminal agent: the conversation log entries,
//! tool descriptions and calls, cache markers, and the shared error type.
//! Every other crate in the workspace speaks this vocabulary.

pub mod error;
pub mod message;
pub mod tool;

pub use error::{Result, TernError};
pub use message::{BlockKind, CacheMarker, Content, ContentBlock, Message, Role, image_media_type};
pub use tool::{Tool, ToolCall, ToolExecutor};
