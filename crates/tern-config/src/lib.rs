//! # tern-config
//!
//! Configuration for the Tern agent. Reads `tern.toml`, then applies
//! environment variables, then CLI overrides, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{ConfigWarning, TernConfig, WarningSeverity};
