//! Error taxonomy for graph construction, scheduling and execution.

use crate::core::Status;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A codelet returned a non-success status while a pipeline or sequence was running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    /// Stage that ran the task (0 when executed outside a pipeline)
    pub stage: usize,
    pub module: String,
    pub task: String,
    /// First frame of the wave the codelet was invoked for
    pub frame: usize,
    pub status: Status,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task '{}::{}' returned status {} at frame {} (stage {})",
            self.module, self.task, self.status.code(), self.frame, self.stage
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument detected while building a module or sequence
    #[error("configuration error in '{entity}': {message}")]
    Config { entity: String, message: String },

    /// Programming error in graph construction or module usage
    #[error("state error in '{entity}': {message}")]
    State { entity: String, message: String },

    /// Cyclic dependency or unsatisfiable stage request
    #[error("scheduling error: {0}")]
    Scheduling(String),

    #[error("execution error: {0}")]
    Execution(ExecutionFailure),

    /// Error raised by an embedded foreign evaluation engine
    #[error("foreign engine error in '{entity}': {message}")]
    Foreign { entity: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn state(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn scheduling(message: impl Into<String>) -> Self {
        Self::Scheduling(message.into())
    }

    pub fn foreign(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Foreign {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    pub fn is_scheduling(&self) -> bool {
        matches!(self, Self::Scheduling(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
