use crate::error::{Error, Result};
use crate::resilience::ErrorPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_queue_capacity() -> usize {
    2
}

fn default_runs() -> usize {
    1
}

/// Runtime settings of a generated pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Waves buffered between two consecutive stages
    #[serde(default = "default_queue_capacity", alias = "channel_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Read the `pipeline_config` object of a JSON document. A missing
    /// object yields the defaults.
    pub fn from_json(config: &Value) -> Result<Self> {
        let section = &config["pipeline_config"];
        let parsed: Self = if section.is_null() {
            Self::default()
        } else {
            serde_json::from_value(section.clone())
                .map_err(|e| Error::config("pipeline_config", e.to_string()))?
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::config(
                "pipeline_config",
                "'queue_capacity' has to be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Settings of `Scheduler::profile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Full passes over every frame; durations are averaged over all of them
    #[serde(default = "default_runs")]
    pub runs: usize,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self { runs: default_runs() }
    }
}

impl ProfilingConfig {
    pub fn from_json(config: &Value) -> Result<Self> {
        let section = &config["profiling"];
        let parsed: Self = if section.is_null() {
            Self::default()
        } else {
            serde_json::from_value(section.clone())
                .map_err(|e| Error::config("profiling", e.to_string()))?
        };
        if parsed.runs == 0 {
            return Err(Error::config("profiling", "'runs' has to be greater than 0"));
        }
        Ok(parsed)
    }
}
