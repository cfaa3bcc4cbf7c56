//! # tern-cli
//!
//! Command-line interface for the Tern terminal agent.
//!
//! ## Commands
//!
//! - `tern` / `tern chat` — Interactive agent session in the terminal
//! - `tern config` — Show the effective configuration (secrets masked)

pub mod commands;
pub mod provider;

pub use commands::Cli;
