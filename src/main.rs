use anyhow::Result;
use tracing_subscriber::EnvFilter;
use wavepipe::core::{Module, SocketId, Status, TaskId};
use wavepipe::engine::{
    BalancedScheduler, PipelineConfig, ProfilingConfig, Scheduler, Sequence, TaskRef,
};
use wavepipe::modules::{Initializer, Stateless};

const N_ELMTS: usize = 256;

/// Module applying `f` element-wise from its `in` socket to its `out` socket
fn map_module(name: &str, f: fn(f32) -> f32) -> Result<(Stateless, SocketId, SocketId)> {
    let mut m = Stateless::new(name);
    let t = m.create_task("map")?;
    let s_in = m.create_socket_in::<f32>(t, "in", N_ELMTS)?;
    let s_out = m.create_socket_out::<f32>(t, "out", N_ELMTS)?;
    m.create_codelet(t, move |m: &mut Stateless, t: TaskId, frame| {
        let n = m.core().wave_len(frame);
        let input = m.core().socket(t, s_in)?.frames::<f32>(frame, n)?.to_vec();
        let out = m.core_mut().socket_mut(t, s_out)?.frames_mut::<f32>(frame, n)?;
        for (o, i) in out.iter_mut().zip(input) {
            *o = f(i);
        }
        Ok(Status::SUCCESS)
    })?;
    Ok((m, s_in, s_out))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("wavepipe - staged pipeline demo");
    println!("===============================\n");

    let config = serde_json::json!({
        "pipeline_config": {
            "queue_capacity": 4,
            "error_policy": "propagate"
        },
        "profiling": {
            "runs": 2
        },
        "n_frames": 64,
        "n_frames_per_wave": 4,
        "n_stages": 2
    });
    let pipeline_config = PipelineConfig::from_json(&config)?;
    let profiling = ProfilingConfig::from_json(&config)?;
    let n_frames = config["n_frames"].as_u64().unwrap_or(64) as usize;
    let n_frames_per_wave = config["n_frames_per_wave"].as_u64().unwrap_or(1) as usize;
    let n_stages = config["n_stages"].as_u64().unwrap_or(2) as usize;

    // Initializer (20µs per frame) -> Square -> Offset
    let mut sequence = Sequence::new();
    let mut source = Initializer::<f32>::new(N_ELMTS, 20_000)?;
    source.set_n_frames(n_frames)?;
    let rows: Vec<Vec<f32>> = (0..n_frames)
        .map(|f| (0..N_ELMTS).map(|e| (f * N_ELMTS + e) as f32 / 1000.0).collect())
        .collect();
    source.set_init_data(&rows)?;
    let (source_task, source_out) = (source.task(), source.out());
    let source = sequence.add_module(source);
    let (square, square_in, square_out) = map_module("Square", |x| x * x)?;
    let (offset, offset_in, _) = map_module("Offset", |x| x + 1.0)?;
    let square = sequence.add_module(square);
    let offset = sequence.add_module(offset);
    sequence.set_n_frames(n_frames)?;
    sequence.set_n_frames_per_wave(n_frames_per_wave)?;

    let source_task = TaskRef::new(source, source_task);
    let square_task = sequence.task_ref(square, "map")?;
    let offset_task = sequence.task_ref(offset, "map")?;
    sequence.bind(source_task.socket(source_out), square_task.socket(square_in))?;
    sequence.bind(square_task.socket(square_out), offset_task.socket(offset_in))?;

    let mut scheduler = BalancedScheduler::new(sequence).with_profiling(profiling);
    scheduler.profile()?;
    scheduler.print_profiling();

    let pipeline = scheduler.generate_pipeline_with(n_stages, pipeline_config)?;
    for (i, tasks) in pipeline.stages().iter().enumerate() {
        println!("stage {}: {} task(s)", i, tasks.len());
    }

    let (pipeline, report) = pipeline.run_async().await?;
    println!("\n{}", pipeline.monitor().generate_report());
    println!(
        "{} waves, {} frames in {:?}",
        report.waves_completed, report.frames_processed, report.duration
    );

    Ok(())
}
