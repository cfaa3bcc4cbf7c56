use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much the agent may do without asking:
///
/// - **Auto**: every tool call runs immediately.
/// - **Manual**: every tool call waits for an explicit yes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Auto,
    #[default]
    Manual,
}

impl ExecutionMode {
    /// Whether each tool call needs human approval first.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::Manual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Auto => "Tools run without confirmation",
            Self::Manual => "Every tool call requires approval",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown execution mode '{other}' (expected auto or manual)")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
