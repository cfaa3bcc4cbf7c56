//! # tern-runtime
//!
//! The agent turn loop and the parts it drives.
//!
//! ## Architecture
//!
//! ```text
//!     user input ──► Orchestrator ◄── InterruptController (CancellationToken)
//!                        │
//!        ┌───────────────┼────────────────┬──────────────┐
//!        ▼               ▼                ▼              ▼
//!   CacheStrategy    LlmProvider     ToolDispatcher   UsageLedger
//!   (markers)        (round trip)    (approval, cap)  (cost, cache)
//!                                         │
//!                                         ▼
//!                                   BuiltinTools ──► UndoJournal ◄── GitWorkTree
//! ```

pub mod cache;
pub mod dispatch;
pub mod interrupt;
pub mod ledger;
pub mod orchestrator;
pub mod tools;
pub mod undo;

pub use cache::CacheStrategy;
pub use dispatch::{DENIAL_MESSAGE, ToolDispatcher, truncate_output};
pub use interrupt::{InterruptController, InterruptKind};
pub use ledger::{CacheRegression, UsageLedger};
pub use orchestrator::{
    DEFAULT_MAX_ROUND_TRIPS, DEFAULT_SYSTEM_PROMPT, Orchestrator, TurnEvent, TurnOutcome, TurnState,
};
pub use tools::{BuiltinTools, DEFAULT_MAX_OUTPUT_BYTES};
pub use undo::{GitWorkTree, UndoJournal};
