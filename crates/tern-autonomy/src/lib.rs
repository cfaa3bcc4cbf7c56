//! # tern-autonomy
//!
//! Decides whether a tool call may run on its own. The execution mode says
//! whether a human must be asked; the approval gate carries the question to
//! the terminal and the answer back.

pub mod approval;
pub mod mode;

pub use approval::{ApprovalGate, ApprovalReceiver, ApprovalRequest, ApprovalResponse, Approver};
pub use mode::ExecutionMode;
