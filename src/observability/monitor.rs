use super::MetricsCollector;

/// Human-readable view over a pipeline's stage metrics
#[derive(Clone)]
pub struct PipelineMonitor {
    collector: MetricsCollector,
    stage_tasks: Vec<Vec<String>>,
}

impl PipelineMonitor {
    pub fn new(collector: MetricsCollector, stage_tasks: Vec<Vec<String>>) -> Self {
        Self {
            collector,
            stage_tasks,
        }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No stages registered".to_string();
        }

        let mut report = String::from("=== Pipeline Metrics ===\n");

        for metrics in snapshot.iter() {
            let tasks = self
                .stage_tasks
                .get(metrics.stage)
                .map(|t| t.join(", "))
                .unwrap_or_default();
            report.push_str(&format!(
                "\n[stage {}] {}\n  Waves: {} ({} frames)\n  Errors: {}\n  Busy: {:?}\n  Idle: {:?}\n  Avg Wave Latency: {}μs\n",
                metrics.stage,
                tasks,
                metrics.waves_processed,
                metrics.frames_processed,
                if metrics.errors_count > 0 {
                    format!(
                        "{} error{}",
                        metrics.errors_count,
                        if metrics.errors_count == 1 { "" } else { "s" }
                    )
                } else {
                    "0 errors".to_string()
                },
                metrics.busy_time,
                metrics.idle_time,
                metrics.avg_wave_latency_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
