use super::StageMetrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub stage: usize,
    pub waves_processed: u64,
    pub frames_processed: u64,
    pub errors_count: u64,
    pub busy_time: Duration,
    pub idle_time: Duration,
    pub avg_wave_latency_us: u64,
}

/// Per-stage metrics in stage order
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Vec<Arc<StageMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metrics: Arc<StageMetrics>) {
        self.metrics.push(metrics);
        self.metrics.sort_by_key(|m| m.stage());
    }

    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|metrics| MetricsSnapshot {
                stage: metrics.stage(),
                waves_processed: metrics.waves_processed(),
                frames_processed: metrics.frames_processed(),
                errors_count: metrics.errors_count(),
                busy_time: metrics.busy_time(),
                idle_time: metrics.idle_time(),
                avg_wave_latency_us: metrics.avg_wave_latency_us(),
            })
            .collect()
    }

    pub fn get_stage_metrics(&self, stage: usize) -> Option<Arc<StageMetrics>> {
        self.metrics.iter().find(|m| m.stage() == stage).cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
