//! Prompt-cache checkpoint placement.
//!
//! Before every round trip the orchestrator hands the live log to
//! [`CacheStrategy::annotate`], which only moves markers around: messages are
//! never added, removed or reordered here.

use std::collections::BTreeSet;
use tern_core::{Message, Role};
use tracing::debug;

/// Stride between rolling checkpoint candidates.
pub const ROLLING_STRIDE: usize = 8;
/// History checkpoints kept by the rolling strategy. The provider allows 4
/// markers in total; the system prompt and tool schemas take the other two.
pub const ROLLING_HISTORY_QUOTA: usize = 2;

/// Offsets tried around a candidate, in order, when its message is empty.
const PROBE_OFFSETS: [isize; 5] = [0, -1, 1, -2, 2];

/// How markers are placed for the active model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// The provider has no explicit cache control; the log is left alone.
    Disabled,
    /// The provider honours only the last marker: keep exactly one, as late
    /// as possible.
    TrailingCheckpoint,
    /// The provider honours several markers: spread them at a fixed stride
    /// and keep a sliding window of the newest `history_quota`.
    RollingCheckpoints { stride: usize, history_quota: usize },
}

impl CacheStrategy {
    /// Pick the strategy for a model id. Decided once per session.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.contains("claude") || model.contains("anthropic") {
            Self::RollingCheckpoints {
                stride: ROLLING_STRIDE,
                history_quota: ROLLING_HISTORY_QUOTA,
            }
        } else if model.contains("gemini") {
            Self::TrailingCheckpoint
        } else {
            Self::Disabled
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::TrailingCheckpoint => "trailing",
            Self::RollingCheckpoints { .. } => "rolling",
        }
    }

    /// Rewrite marker placement on `log` in place. Idempotent.
    pub fn annotate(&self, log: &mut [Message]) {
        match *self {
            Self::Disabled => {}
            Self::TrailingCheckpoint => {
                mark_system(log);
                place_trailing(log);
            }
            Self::RollingCheckpoints {
                stride,
                history_quota,
            } => {
                mark_system(log);
                let desired = rolling_targets(log, stride, history_quota);
                reconcile(log, &desired);
            }
        }
    }
}

/// Indices of history messages currently carrying a marker.
pub fn marked_history_indices(log: &[Message]) -> Vec<usize> {
    log.iter()
        .enumerate()
        .filter(|(_, m)| m.role != Role::System && m.content.has_marker())
        .map(|(i, _)| i)
        .collect()
}

fn mark_system(log: &mut [Message]) {
    if let Some(system) = log.first_mut().filter(|m| m.role == Role::System)
        && !system.content.has_marker()
    {
        system.content.mark_last_block();
    }
}

fn place_trailing(log: &mut [Message]) {
    for msg in log.iter_mut().filter(|m| m.role != Role::System) {
        msg.content.clear_markers();
    }
    if let Some(last) = log
        .iter_mut()
        .rev()
        .find(|m| m.role != Role::System && !m.content.is_empty())
    {
        last.content.mark_last_block();
    }
}

/// Resolve stride candidates to markable messages and keep the newest ones.
fn rolling_targets(log: &[Message], stride: usize, quota: usize) -> BTreeSet<usize> {
    let len = log.len();
    let mut resolved: Vec<usize> = Vec::new();

    for candidate in (stride.max(1)..len).step_by(stride.max(1)) {
        if log[candidate].role == Role::System {
            continue;
        }
        let hit = PROBE_OFFSETS.iter().find_map(|offset| {
            let idx = candidate.checked_add_signed(*offset)?;
            let markable = idx > 0
                && idx < len
                && log[idx].role != Role::System
                && !log[idx].content.is_empty()
                && !resolved.contains(&idx);
            markable.then_some(idx)
        });
        match hit {
            Some(idx) => resolved.push(idx),
            None => debug!(candidate, "no markable message near checkpoint candidate"),
        }
    }

    let skip = resolved.len().saturating_sub(quota);
    resolved.into_iter().skip(skip).collect()
}

fn reconcile(log: &mut [Message], desired: &BTreeSet<usize>) {
    for (idx, msg) in log.iter_mut().enumerate() {
        if msg.role == Role::System {
            continue;
        }
        let wanted = desired.contains(&idx);
        if !wanted && msg.content.has_marker() {
            msg.content.clear_markers();
        } else if wanted && !msg.content.has_marker() && !msg.content.mark_last_block() {
            debug!(idx, "checkpoint target has empty content, skipped");
        }
    }
}
