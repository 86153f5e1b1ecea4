use super::config::PipelineConfig;
use super::sequence::{Sequence, SocketRef, TaskRef};
use super::stage::{StageOutput, StagePlan, StageWorker, Wave, WaveReport};
use super::state::PipelineState;
use crate::error::{Error, ExecutionFailure, Result};
use crate::observability::{MetricsCollector, MetricsSnapshot, PipelineMonitor, StageMetrics};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cancels a pipeline from any thread.
///
/// Stopping wakes every stage blocked on a queue; waves already inside a
/// codelet run to the end.
#[derive(Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    cancel_tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl StopHandle {
    fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(0);
        (
            Self {
                requested: Arc::new(AtomicBool::new(false)),
                cancel_tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.abort();
    }

    /// True once `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Disconnect the cancel channel without flagging a user stop
    pub(crate) fn abort(&self) {
        self.cancel_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Statistics of a finished pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub waves_completed: u64,
    pub frames_processed: u64,
    pub duration: Duration,
    pub cancelled: bool,
    /// Failures tagged under `ErrorPolicy::SkipFrame`, in wave order
    pub failures: Vec<ExecutionFailure>,
    pub stages: Vec<MetricsSnapshot>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

struct Stage {
    plan: StagePlan,
    task_names: Vec<String>,
    sequence: Option<Sequence>,
    metrics: Arc<StageMetrics>,
}

struct Running {
    input: Option<Sender<Wave>>,
    handles: Vec<JoinHandle<(Sequence, Result<()>)>>,
    completions: Receiver<WaveReport>,
    start_time: Instant,
    next_frame: usize,
    next_wave: u64,
}

/// Staged, concurrent form of a sequence.
///
/// Every stage owns a private duplicate of the sequence and runs its tasks on
/// a dedicated thread. Consecutive stages are connected by bounded queues of
/// `queue_capacity` waves.
pub struct Pipeline {
    config: PipelineConfig,
    stages: Vec<Stage>,
    stage_of: HashMap<TaskRef, usize>,
    n_frames: usize,
    n_frames_per_wave: usize,
    state: PipelineState,
    stop: StopHandle,
    cancel_rx: Receiver<()>,
    running: Option<Running>,
    collector: MetricsCollector,
    last_report: Option<PipelineReport>,
}

impl Pipeline {
    /// Build a pipeline from a partition of the sequence's tasks.
    ///
    /// Every task has to appear in exactly one stage, and no binding may flow
    /// from a later stage to an earlier one.
    pub fn new(
        sequence: &Sequence,
        partition: Vec<Vec<TaskRef>>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (n_frames, n_frames_per_wave) = sequence.frame_layout()?;
        let plan = sequence.plan()?;
        let position: HashMap<TaskRef, usize> =
            plan.order.iter().enumerate().map(|(i, &t)| (t, i)).collect();

        if partition.is_empty() {
            return Err(Error::scheduling("a pipeline needs at least one stage"));
        }
        let mut stage_of = HashMap::new();
        for (i, tasks) in partition.iter().enumerate() {
            if tasks.is_empty() {
                return Err(Error::scheduling(format!("stage {} has no task", i)));
            }
            for &t in tasks {
                if !position.contains_key(&t) {
                    return Err(Error::scheduling(format!(
                        "task {} is not part of the sequence",
                        t
                    )));
                }
                if stage_of.insert(t, i).is_some() {
                    return Err(Error::scheduling(format!(
                        "task '{}' is assigned to more than one stage",
                        sequence.task_name(t)
                    )));
                }
            }
        }
        if stage_of.len() != plan.order.len() {
            let missing: Vec<String> = plan
                .order
                .iter()
                .filter(|t| !stage_of.contains_key(t))
                .map(|&t| sequence.task_name(t))
                .collect();
            return Err(Error::scheduling(format!(
                "tasks [{}] are not assigned to any stage",
                missing.join(", ")
            )));
        }

        let mut plans: Vec<StagePlan> = partition
            .into_iter()
            .enumerate()
            .map(|(index, mut tasks)| {
                tasks.sort_by_key(|t| position[t]);
                StagePlan {
                    index,
                    tasks,
                    ..StagePlan::default()
                }
            })
            .collect();

        let mut last_reader: HashMap<SocketRef, usize> = HashMap::new();
        let mut exported: HashSet<SocketRef> = HashSet::new();
        for b in sequence.bindings() {
            let ps = stage_of[&b.from.task_ref()];
            let cs = stage_of[&b.to.task_ref()];
            if ps > cs {
                return Err(Error::scheduling(format!(
                    "'{}' (stage {}) feeds '{}' from a later stage than its consumer (stage {})",
                    sequence.task_name(b.from.task_ref()),
                    ps,
                    sequence.task_name(b.to.task_ref()),
                    cs
                )));
            }
            if ps == cs {
                plans[cs]
                    .local
                    .entry(b.to.task_ref())
                    .or_default()
                    .push(*b);
                continue;
            }
            plans[cs].imports.push(*b);
            if exported.insert(b.from) {
                plans[ps].exports.push(b.from);
            }
            let reader = last_reader.entry(b.from).or_insert(cs);
            *reader = (*reader).max(cs);
        }
        for (socket, stage) in last_reader {
            plans[stage].retire.push(socket);
        }

        let mut stages = Vec::with_capacity(plans.len());
        let mut collector = MetricsCollector::new();
        for plan in plans {
            let metrics = Arc::new(StageMetrics::new(plan.index));
            collector.register(metrics.clone());
            stages.push(Stage {
                task_names: plan.tasks.iter().map(|&t| sequence.task_name(t)).collect(),
                sequence: Some(sequence.duplicate()?),
                plan,
                metrics,
            });
        }

        let (stop, cancel_rx) = StopHandle::new();
        debug!(
            stages = stages.len(),
            n_frames, n_frames_per_wave, "pipeline constructed"
        );
        Ok(Self {
            config,
            stages,
            stage_of,
            n_frames,
            n_frames_per_wave,
            state: PipelineState::Constructed,
            stop,
            cancel_rx,
            running: None,
            collector,
            last_report: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// Tasks of every stage, in execution order
    pub fn stages(&self) -> Vec<&[TaskRef]> {
        self.stages.iter().map(|s| s.plan.tasks.as_slice()).collect()
    }

    pub fn stage_of(&self, task: TaskRef) -> Option<usize> {
        self.stage_of.get(&task).copied()
    }

    /// Private sequence of a stage; `None` while the pipeline is running
    pub fn stage_sequence(&self, stage: usize) -> Option<&Sequence> {
        self.stages.get(stage).and_then(|s| s.sequence.as_ref())
    }

    pub fn stage_sequence_mut(&mut self, stage: usize) -> Option<&mut Sequence> {
        self.stages.get_mut(stage).and_then(|s| s.sequence.as_mut())
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn n_frames_per_wave(&self) -> usize {
        self.n_frames_per_wave
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor::new(
            self.collector.clone(),
            self.stages.iter().map(|s| s.task_names.clone()).collect(),
        )
    }

    /// Transition to a new state with validation
    fn transition_to(&mut self, new_state: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(Error::state(
                "pipeline",
                format!(
                    "invalid state transition: {} -> {}",
                    self.state.name(),
                    new_state.name()
                ),
            ));
        }
        self.state = new_state;
        Ok(())
    }

    /// Spawn one worker thread per stage
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() || self.state.is_running() {
            return Err(Error::state("pipeline", "pipeline is already running"));
        }
        let start_time = Instant::now();
        self.transition_to(PipelineState::Running {
            start_time: Some(start_time),
            waves_submitted: 0,
        })?;

        let capacity = self.config.queue_capacity;
        let (input_tx, mut input) = bounded::<Wave>(capacity);
        let (done_tx, completions) = unbounded();
        let n_stages = self.stages.len();
        let mut handles = Vec::with_capacity(n_stages);

        for (i, stage) in self.stages.iter_mut().enumerate() {
            let sequence = stage
                .sequence
                .take()
                .ok_or_else(|| Error::state(format!("stage {}", i), "stage sequence is missing"))?;
            let (output, next_input) = if i + 1 == n_stages {
                (StageOutput::Done(done_tx.clone()), None)
            } else {
                let (tx, rx) = bounded::<Wave>(capacity);
                (StageOutput::Next(tx), Some(rx))
            };
            handles.push(spawn_stage(StageWorker {
                plan: stage.plan.clone(),
                sequence,
                input,
                output,
                cancel: self.cancel_rx.clone(),
                stop: self.stop.clone(),
                metrics: stage.metrics.clone(),
                policy: self.config.error_policy,
            })?);
            match next_input {
                Some(rx) => input = rx,
                None => break,
            }
        }

        info!(
            stages = n_stages,
            queue_capacity = capacity,
            "pipeline started"
        );
        self.running = Some(Running {
            input: Some(input_tx),
            handles,
            completions,
            start_time,
            next_frame: 0,
            next_wave: 0,
        });
        Ok(())
    }

    /// Inject the next wave into the first stage, blocking while its queue is
    /// full. Returns the wave's first frame, or `None` once every frame was
    /// submitted or the pipeline was stopped.
    pub fn run_wave(&mut self) -> Result<Option<usize>> {
        if matches!(self.state, PipelineState::Constructed) {
            self.start()?;
        }
        if self.stop.is_stopped() {
            return Ok(None);
        }
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| Error::state("pipeline", "pipeline is stopped"))?;
        if running.next_frame >= self.n_frames {
            return Ok(None);
        }

        let first = running.next_frame;
        let len = self.n_frames_per_wave.min(self.n_frames - first);
        let wave = Wave::new(running.next_wave, first, len);
        let delivered = match running.input.as_ref() {
            Some(input) => select! {
                send(input, wave) -> res => res.is_ok(),
                recv(self.cancel_rx) -> _ => false,
            },
            None => false,
        };

        if !delivered {
            if self.stop.is_stopped() {
                return Ok(None);
            }
            // a stage terminated on an error; surface it
            self.finish()?;
            return Err(Error::state("pipeline", "a stage terminated early"));
        }

        running.next_frame += len;
        running.next_wave += 1;
        let waves_submitted = running.next_wave;
        let start_time = Some(running.start_time);
        debug!(wave = waves_submitted - 1, first_frame = first, n_frames = len, "wave submitted");
        self.transition_to(PipelineState::Running {
            start_time,
            waves_submitted,
        })?;
        Ok(Some(first))
    }

    /// Submit every remaining wave, then drain and stop
    pub fn run(&mut self) -> Result<PipelineReport> {
        while self.run_wave()?.is_some() {}
        self.finish()
    }

    /// Close the input, wait for in-flight waves and join the workers.
    ///
    /// Once stopped, later calls return the report of the finished run.
    pub fn finish(&mut self) -> Result<PipelineReport> {
        if self.running.is_none() && self.state.is_stopped() {
            return self.last_report.clone().ok_or_else(|| {
                Error::state("pipeline", "pipeline already stopped on an error")
            });
        }
        let cancelled = self.stop.is_stopped();
        let Some(mut running) = self.running.take() else {
            let report = self.report(Vec::new(), Duration::ZERO, cancelled);
            self.transition_to(PipelineState::Stopped {
                duration: Some(Duration::ZERO),
                total_frames: 0,
                cancelled,
            })?;
            self.last_report = Some(report.clone());
            return Ok(report);
        };
        drop(running.input.take());

        let mut first_error = None;
        for (i, handle) in running.handles.drain(..).enumerate() {
            match handle.join() {
                Ok((sequence, result)) => {
                    self.stages[i].sequence = Some(sequence);
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                }
                Err(_) => {
                    first_error.get_or_insert(Error::state(
                        format!("stage {}", i),
                        "stage worker panicked",
                    ));
                }
            }
        }

        let waves: Vec<WaveReport> = running.completions.try_iter().collect();
        let duration = running.start_time.elapsed();
        let report = self.report(waves, duration, cancelled);
        self.state = PipelineState::Stopped {
            duration: Some(duration),
            total_frames: report.frames_processed,
            cancelled,
        };
        info!(
            waves = report.waves_completed,
            frames = report.frames_processed,
            cancelled,
            "pipeline stopped in {:?}",
            duration
        );

        match first_error {
            Some(e) => Err(e),
            None => {
                self.last_report = Some(report.clone());
                Ok(report)
            }
        }
    }

    /// Cancel the run and collect what completed
    pub fn stop(&mut self) -> Result<PipelineReport> {
        if !self.state.is_stopped() {
            self.stop.stop();
        }
        self.finish()
    }

    /// Run to completion on tokio's blocking pool
    pub async fn run_async(mut self) -> Result<(Self, PipelineReport)> {
        tokio::task::spawn_blocking(move || -> Result<(Self, PipelineReport)> {
            let report = self.run()?;
            Ok((self, report))
        })
        .await
        .map_err(|e| Error::state("pipeline", format!("pipeline task failed: {}", e)))?
    }

    fn report(
        &self,
        mut waves: Vec<WaveReport>,
        duration: Duration,
        cancelled: bool,
    ) -> PipelineReport {
        waves.sort_by_key(|w| w.id);
        let frames_processed = waves
            .iter()
            .filter(|w| w.failures.is_empty())
            .map(|w| w.n_frames as u64)
            .sum();
        PipelineReport {
            waves_completed: waves.len() as u64,
            frames_processed,
            duration,
            cancelled,
            failures: waves.into_iter().flat_map(|w| w.failures).collect(),
            stages: self.collector.snapshot(),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|s| &s.task_names).collect::<Vec<_>>())
            .field("n_frames", &self.n_frames)
            .field("n_frames_per_wave", &self.n_frames_per_wave)
            .field("state", &self.state)
            .finish()
    }
}

fn spawn_stage(worker: StageWorker) -> Result<JoinHandle<(Sequence, Result<()>)>> {
    let name = format!("wavepipe-stage-{}", worker.plan.index);
    Ok(std::thread::Builder::new()
        .name(name)
        .spawn(move || worker.run())?)
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            self.stop.abort();
            drop(running.input.take());
            for handle in running.handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
