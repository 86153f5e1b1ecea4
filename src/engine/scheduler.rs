use super::config::{PipelineConfig, ProfilingConfig};
use super::pipeline::Pipeline;
use super::sequence::{Sequence, TaskRef};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Measured cost of one task, in sequence traversal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDesc {
    pub task: TaskRef,
    pub name: String,
    /// Mean duration of one codelet invocation
    pub exec_duration: Duration,
    pub n_calls: u64,
}

pub(crate) fn lock(sequence: &Mutex<Sequence>) -> MutexGuard<'_, Sequence> {
    sequence.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared by every scheduler: the bound sequence and its profile
pub struct SchedulerCore {
    sequence: Arc<Mutex<Sequence>>,
    tasks_desc: Vec<TaskDesc>,
    profiling: ProfilingConfig,
}

impl SchedulerCore {
    /// Take ownership of the sequence
    pub fn new(sequence: Sequence) -> Self {
        Self::shared(Arc::new(Mutex::new(sequence)))
    }

    /// Bind to a sequence that other code keeps a handle on
    pub fn shared(sequence: Arc<Mutex<Sequence>>) -> Self {
        Self {
            sequence,
            tasks_desc: Vec::new(),
            profiling: ProfilingConfig::default(),
        }
    }

    pub fn sequence(&self) -> Arc<Mutex<Sequence>> {
        self.sequence.clone()
    }

    pub fn profiling_config(&self) -> &ProfilingConfig {
        &self.profiling
    }

    pub fn set_profiling_config(&mut self, profiling: ProfilingConfig) {
        self.profiling = profiling;
    }

    pub fn tasks_desc(&self) -> &[TaskDesc] {
        &self.tasks_desc
    }

    pub fn is_profiled(&self) -> bool {
        !self.tasks_desc.is_empty()
    }

    /// Time every task over all frames on a private duplicate of the
    /// sequence. Previous measurements are replaced, or cleared on failure.
    pub fn profile(&mut self) -> Result<()> {
        self.tasks_desc.clear();
        let measured = {
            let sequence = lock(&self.sequence);
            measure(&sequence, &self.profiling)
        };
        match measured {
            Ok(tasks_desc) => {
                info!(
                    tasks = tasks_desc.len(),
                    runs = self.profiling.runs,
                    "profiling done"
                );
                self.tasks_desc = tasks_desc;
                Ok(())
            }
            Err(e) => {
                warn!("profiling failed: {}", e);
                Err(e)
            }
        }
    }

    /// Weight of each task of `order`: its profiled duration in nanoseconds,
    /// or 1 for every task when no usable profile exists.
    pub fn task_weights(&self, order: &[TaskRef]) -> Vec<u64> {
        let profiled: HashMap<TaskRef, u64> = self
            .tasks_desc
            .iter()
            .map(|d| (d.task, d.exec_duration.as_nanos() as u64))
            .collect();
        let weights: Option<Vec<u64>> = order.iter().map(|t| profiled.get(t).copied()).collect();
        match weights {
            Some(weights) if !weights.is_empty() => weights,
            _ => {
                debug!("no profile covers every task, using unit weights");
                vec![1; order.len()]
            }
        }
    }

    pub fn profiling_report(&self) -> String {
        if self.tasks_desc.is_empty() {
            return "No profiling data".to_string();
        }

        let mut report = String::from("=== Task Profiling ===\n");
        report.push_str(&format!(
            "{:>3}  {:<40} {:>14} {:>8}\n",
            "#", "task", "duration", "calls"
        ));
        let mut total = Duration::ZERO;
        for (i, desc) in self.tasks_desc.iter().enumerate() {
            total += desc.exec_duration;
            report.push_str(&format!(
                "{:>3}  {:<40} {:>14} {:>8}\n",
                i,
                desc.name,
                format!("{:?}", desc.exec_duration),
                desc.n_calls
            ));
        }
        report.push_str(&format!(
            "{:>3}  {:<40} {:>14}\n",
            "",
            "total",
            format!("{:?}", total)
        ));
        report
    }

    pub fn print_profiling(&self) {
        print!("{}", self.profiling_report());
    }

    /// Drop the profile and reset the modules of the bound sequence
    pub fn reset(&mut self) {
        self.tasks_desc.clear();
        lock(&self.sequence).reset();
    }
}

fn measure(sequence: &Sequence, config: &ProfilingConfig) -> Result<Vec<TaskDesc>> {
    let plan = sequence.plan()?;
    let (n_frames, n_frames_per_wave) = sequence.frame_layout()?;
    let mut probe = sequence.duplicate()?;
    let mut totals = vec![Duration::ZERO; plan.order.len()];
    let mut calls = vec![0u64; plan.order.len()];

    for _ in 0..config.runs.max(1) {
        let mut frame = 0;
        while frame < n_frames {
            for (i, &task) in plan.order.iter().enumerate() {
                if let Some(inputs) = plan.inputs.get(&task) {
                    probe.transfer(inputs, frame)?;
                }
                let start = Instant::now();
                let status = probe.run_task(task, frame)?;
                totals[i] += start.elapsed();
                calls[i] += 1;
                if !status.is_success() {
                    return Err(Error::Execution(probe.failure(0, task, frame, status)));
                }
            }
            frame += n_frames_per_wave;
        }
    }

    Ok(plan
        .order
        .iter()
        .enumerate()
        .map(|(i, &task)| TaskDesc {
            task,
            name: sequence.task_name(task),
            exec_duration: Duration::from_nanos(
                (totals[i].as_nanos() / calls[i].max(1) as u128) as u64,
            ),
            n_calls: calls[i],
        })
        .collect())
}

/// Turns a profiled sequence into a pipeline.
///
/// Implementors only decide how the topological order is split into stages;
/// profiling, validation and pipeline construction are shared.
pub trait Scheduler {
    fn core(&self) -> &SchedulerCore;

    fn core_mut(&mut self) -> &mut SchedulerCore;

    /// Split `order` into exactly `n_stages` non-empty stages such that no
    /// binding flows backwards.
    fn partition(
        &self,
        sequence: &Sequence,
        order: &[TaskRef],
        n_stages: usize,
    ) -> Result<Vec<Vec<TaskRef>>>;

    fn profile(&mut self) -> Result<()> {
        self.core_mut().profile()
    }

    fn print_profiling(&self) {
        self.core().print_profiling()
    }

    fn profiling_report(&self) -> String {
        self.core().profiling_report()
    }

    fn tasks_desc(&self) -> &[TaskDesc] {
        self.core().tasks_desc()
    }

    fn reset(&mut self) {
        self.core_mut().reset()
    }

    fn generate_pipeline(&self, n_stages: usize) -> Result<Pipeline> {
        self.generate_pipeline_with(n_stages, PipelineConfig::default())
    }

    fn generate_pipeline_with(&self, n_stages: usize, config: PipelineConfig) -> Result<Pipeline> {
        let handle = self.core().sequence();
        let sequence = lock(&handle);
        let order = sequence.topological_order()?;
        if n_stages == 0 {
            return Err(Error::scheduling("'n_stages' has to be greater than 0"));
        }
        if n_stages > order.len() {
            return Err(Error::scheduling(format!(
                "cannot split {} tasks into {} stages",
                order.len(),
                n_stages
            )));
        }

        let partition = self.partition(&sequence, &order, n_stages)?;
        info!(
            stages = partition.len(),
            profiled = self.core().is_profiled(),
            "pipeline generated"
        );
        Pipeline::new(&sequence, partition, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Module, Status};
    use crate::modules::Stateless;

    fn single(name: &str, status: i32) -> Sequence {
        let mut m = Stateless::new(name);
        let t = m.create_task("run").unwrap();
        m.create_codelet(t, move |_: &mut Stateless, _, _| Ok(Status::new(status)))
            .unwrap();
        m.set_n_frames(4).unwrap();
        let mut seq = Sequence::new();
        seq.add_module(m);
        seq
    }

    #[test]
    fn test_profile_counts_calls() {
        let mut core = SchedulerCore::new(single("M", 0));
        core.set_profiling_config(ProfilingConfig { runs: 3 });
        core.profile().unwrap();
        assert_eq!(core.tasks_desc().len(), 1);
        assert_eq!(core.tasks_desc()[0].name, "M::run");
        assert_eq!(core.tasks_desc()[0].n_calls, 12);
        assert!(core.profiling_report().contains("M::run"));
    }

    #[test]
    fn test_failed_profile_clears_data() {
        let mut core = SchedulerCore::new(single("M", 0));
        core.profile().unwrap();
        assert!(core.is_profiled());

        let mut failing = SchedulerCore::shared(Arc::new(Mutex::new(single("F", 3))));
        assert!(matches!(failing.profile(), Err(Error::Execution(_))));
        assert!(!failing.is_profiled());
        assert_eq!(failing.profiling_report(), "No profiling data");
    }

    #[test]
    fn test_unit_weights_without_profile() {
        let core = SchedulerCore::new(single("M", 0));
        let order = lock(&core.sequence()).topological_order().unwrap();
        assert_eq!(core.task_weights(&order), vec![1]);
    }
}
