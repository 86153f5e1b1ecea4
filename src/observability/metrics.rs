use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters of one pipeline stage, shared between its worker and the monitor
pub struct StageMetrics {
    stage: usize,
    waves_processed: AtomicU64,
    frames_processed: AtomicU64,
    errors_count: AtomicU64,
    busy_ns: AtomicU64,
    idle_ns: AtomicU64,
}

impl StageMetrics {
    pub fn new(stage: usize) -> Self {
        Self {
            stage,
            waves_processed: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            busy_ns: AtomicU64::new(0),
            idle_ns: AtomicU64::new(0),
        }
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn waves_processed(&self) -> u64 {
        self.waves_processed.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn record_wave_processed(&self, n_frames: usize) {
        self.waves_processed.fetch_add(1, Ordering::Relaxed);
        self.frames_processed
            .fetch_add(n_frames as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_processing(&self) -> Instant {
        Instant::now()
    }

    /// Time spent executing tasks
    pub fn finish_processing(&self, start: Instant) {
        self.busy_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    /// Time spent blocked on an empty upstream or a full downstream queue
    pub fn record_idle(&self, start: Instant) {
        self.idle_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn busy_time(&self) -> Duration {
        Duration::from_nanos(self.busy_ns.load(Ordering::Relaxed))
    }

    pub fn idle_time(&self) -> Duration {
        Duration::from_nanos(self.idle_ns.load(Ordering::Relaxed))
    }

    pub fn avg_wave_latency_us(&self) -> u64 {
        let waves = self.waves_processed();
        if waves == 0 {
            return 0;
        }
        self.busy_time().as_micros() as u64 / waves
    }
}
