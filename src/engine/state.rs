use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Pipeline lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Stages built, workers not spawned yet
    Constructed,
    Running {
        #[serde(skip)]
        start_time: Option<Instant>,
        waves_submitted: u64,
    },
    Stopped {
        #[serde(skip)]
        duration: Option<Duration>,
        total_frames: u64,
        cancelled: bool,
    },
}

impl PipelineState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, target),
            (Constructed, Running { .. }) |
            // Stopping a pipeline that never ran
            (Constructed, Stopped { .. }) |
            // Progress updates while running
            (Running { .. }, Running { .. }) |
            (Running { .. }, Stopped { .. })
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Constructed => "Constructed",
            Self::Running { .. } => "Running",
            Self::Stopped { .. } => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Constructed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let constructed = PipelineState::Constructed;
        let running = PipelineState::Running {
            start_time: None,
            waves_submitted: 0,
        };

        assert!(constructed.can_transition_to(&running));
        assert!(!running.can_transition_to(&constructed));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let stopped = PipelineState::Stopped {
            duration: None,
            total_frames: 8,
            cancelled: false,
        };
        assert!(!stopped.can_transition_to(&PipelineState::Constructed));
        assert!(!stopped.can_transition_to(&PipelineState::Running {
            start_time: None,
            waves_submitted: 0,
        }));
        assert!(!stopped.can_transition_to(&stopped.clone()));
    }

    #[test]
    fn test_stop_without_running() {
        let stopped = PipelineState::Stopped {
            duration: None,
            total_frames: 0,
            cancelled: true,
        };
        assert!(PipelineState::Constructed.can_transition_to(&stopped));
        assert_eq!(stopped.name(), "Stopped");
        assert!(stopped.is_stopped());
    }
}
