use super::pipeline::StopHandle;
use super::sequence::{Binding, Sequence, SocketRef, TaskRef};
use crate::core::SocketBuffer;
use crate::error::{Error, ExecutionFailure, Result};
use crate::observability::StageMetrics;
use crate::resilience::ErrorPolicy;
use crossbeam_channel::{select, Receiver, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A batch of frames travelling through the stages, carrying the socket
/// windows that later stages import.
#[derive(Debug)]
pub(crate) struct Wave {
    pub id: u64,
    pub first_frame: usize,
    pub n_frames: usize,
    pub carried: HashMap<SocketRef, SocketBuffer>,
    pub failures: Vec<ExecutionFailure>,
}

impl Wave {
    pub fn new(id: u64, first_frame: usize, n_frames: usize) -> Self {
        Self {
            id,
            first_frame,
            n_frames,
            carried: HashMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Outcome of one wave after the last stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveReport {
    pub id: u64,
    pub first_frame: usize,
    pub n_frames: usize,
    pub failures: Vec<ExecutionFailure>,
}

impl From<Wave> for WaveReport {
    fn from(wave: Wave) -> Self {
        Self {
            id: wave.id,
            first_frame: wave.first_frame,
            n_frames: wave.n_frames,
            failures: wave.failures,
        }
    }
}

/// What one stage runs and which socket windows it exchanges with the others
#[derive(Debug, Clone, Default)]
pub(crate) struct StagePlan {
    pub index: usize,
    /// Tasks in topological order
    pub tasks: Vec<TaskRef>,
    /// Bindings whose producer lives in an earlier stage
    pub imports: Vec<Binding>,
    /// Bindings between two tasks of this stage, per consumer task
    pub local: HashMap<TaskRef, Vec<Binding>>,
    /// Producer sockets read by a later stage
    pub exports: Vec<SocketRef>,
    /// Carried windows nobody reads after this stage
    pub retire: Vec<SocketRef>,
}

pub(crate) enum StageOutput {
    Next(Sender<Wave>),
    Done(Sender<WaveReport>),
}

pub(crate) struct StageWorker {
    pub plan: StagePlan,
    pub sequence: Sequence,
    pub input: Receiver<Wave>,
    pub output: StageOutput,
    pub cancel: Receiver<()>,
    pub stop: StopHandle,
    pub metrics: Arc<StageMetrics>,
    pub policy: ErrorPolicy,
}

impl StageWorker {
    /// Worker loop. Hands its sequence back so the pipeline can expose the
    /// stage state once stopped.
    pub fn run(mut self) -> (Sequence, Result<()>) {
        let result = self.run_loop();
        if result.is_err() {
            // unblock the other stages and the driver
            self.stop.abort();
        }
        debug!(stage = self.plan.index, "stage worker exiting");
        (self.sequence, result)
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }

            let idle = Instant::now();
            let mut wave = select! {
                recv(self.input) -> msg => match msg {
                    Ok(wave) => wave,
                    // upstream closed and drained
                    Err(_) => return Ok(()),
                },
                recv(self.cancel) -> _ => return Ok(()),
            };
            self.metrics.record_idle(idle);

            let start = self.metrics.start_processing();
            self.process(&mut wave)?;
            self.metrics.finish_processing(start);
            self.metrics.record_wave_processed(wave.n_frames);

            match &self.output {
                StageOutput::Next(tx) => {
                    let idle = Instant::now();
                    select! {
                        send(tx, wave) -> res => if res.is_err() {
                            return Ok(());
                        },
                        recv(self.cancel) -> _ => return Ok(()),
                    }
                    self.metrics.record_idle(idle);
                }
                StageOutput::Done(tx) => {
                    // the driver may already be gone when cancelled
                    let _ = tx.send(WaveReport::from(wave));
                }
            }
        }
    }

    fn process(&mut self, wave: &mut Wave) -> Result<()> {
        let first = wave.first_frame;
        if wave.is_failed() {
            debug!(stage = self.plan.index, wave = wave.id, "skipping failed wave");
            return Ok(());
        }

        for b in &self.plan.imports {
            let window = wave.carried.get(&b.from).ok_or_else(|| {
                Error::state(
                    format!("stage {}", self.plan.index),
                    format!(
                        "wave {} does not carry the window of '{}'",
                        wave.id,
                        self.sequence.task_name(b.from.task_ref())
                    ),
                )
            })?;
            self.sequence.import(b.to, first, window)?;
        }
        for s in &self.plan.retire {
            wave.carried.remove(s);
        }

        for &task in &self.plan.tasks {
            if let Some(bindings) = self.plan.local.get(&task) {
                self.sequence.transfer(bindings, first)?;
            }
            let status = self.sequence.run_task(task, first)?;
            if status.is_success() {
                continue;
            }

            let failure = self.sequence.failure(self.plan.index, task, first, status);
            self.metrics.record_error();
            match self.policy {
                ErrorPolicy::Propagate => return Err(Error::Execution(failure)),
                ErrorPolicy::SkipFrame => {
                    warn!(stage = self.plan.index, wave = wave.id, "{}", failure);
                    wave.failures.push(failure);
                    return Ok(());
                }
            }
        }

        for &s in &self.plan.exports {
            let window = self.sequence.export(s, first)?;
            wave.carried.insert(s, window);
        }
        Ok(())
    }
}
