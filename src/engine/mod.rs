pub mod config;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod sequence;
mod stage;
pub mod state;

pub use config::{PipelineConfig, ProfilingConfig};
pub use partition::{linear_partition, task_levels, BalancedScheduler, LevelScheduler};
pub use pipeline::{Pipeline, PipelineReport, StopHandle};
pub use scheduler::{Scheduler, SchedulerCore, TaskDesc};
pub use sequence::{Binding, ExecPlan, ModuleId, Sequence, SocketRef, TaskRef};
pub use stage::WaveReport;
pub use state::PipelineState;
