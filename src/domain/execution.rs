//! Result of running a command list against a device

use serde::{Deserialize, Serialize};

/// Error text for entries stranded in `queued`/`processing` when the process started.
pub const RESTART_INTERRUPTED_ERROR: &str =
    "Interrupted: server restarted while the change was queued or executing";

/// Error text for a queued entry whose in-memory execution routine is missing.
pub const EXECUTION_CONTEXT_LOST_ERROR: &str = "Execution context lost";

/// Outcome reported by an execution connector, and by the device queue to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(output: Option<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Failure text as recorded on the rows. A failure without a message still
    /// gets one so operators never see an empty error.
    pub fn error_text(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(
            self.error
                .clone()
                .unwrap_or_else(|| "Execution failed".to_string()),
        )
    }
}
