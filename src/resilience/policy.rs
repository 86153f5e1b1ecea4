use serde::{Deserialize, Serialize};

/// What a pipeline does when a codelet returns a non-success status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the pipeline and return the failure to the caller
    #[default]
    Propagate,

    /// Tag the wave as failed, skip the remaining tasks for it and keep going.
    /// Failures are still listed in the pipeline report.
    SkipFrame,
}
