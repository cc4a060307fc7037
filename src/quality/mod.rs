//! Validation of generated artifacts.
//!
//! - `commands` — running external compiler/linter/formatter/test commands
//! - `repair` — the bounded retry-with-repair loop around a failing check

pub mod commands;
pub mod repair;

use serde::{Deserialize, Serialize};

pub use commands::{CommandRunner, ShellRunner, render_files_command};
pub use repair::{Repair, RepairLoop, Validate};

/// Result of one external check: pass/fail plus the text to show a repair step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub output: String,
}

impl CommandOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}
