use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wavepipe::core::{Module, SocketId, Status, TaskId};
use wavepipe::engine::{
    BalancedScheduler, Pipeline, PipelineConfig, Scheduler, Sequence, TaskRef,
};
use wavepipe::modules::{Initializer, Stateless};

const N_ELMTS: usize = 2;

type CallLog = Arc<Mutex<Vec<(String, usize, usize)>>>;

/// Element-wise `i32` map recording every invocation as (module, frame_id, wave_len)
fn map(name: &str, f: fn(i32) -> i32, log: &CallLog) -> (Stateless, SocketId, SocketId) {
    let mut m = Stateless::new(name);
    let t = m.create_task("map").unwrap();
    let s_in = m.create_socket_in::<i32>(t, "in", N_ELMTS).unwrap();
    let s_out = m.create_socket_out::<i32>(t, "out", N_ELMTS).unwrap();
    let log = log.clone();
    m.create_codelet(t, move |m: &mut Stateless, t: TaskId, frame| {
        let n = m.core().wave_len(frame);
        log.lock().unwrap().push((m.name().to_string(), frame, n));
        let input = m.core().socket(t, s_in)?.frames::<i32>(frame, n)?.to_vec();
        let out = m.core_mut().socket_mut(t, s_out)?.frames_mut::<i32>(frame, n)?;
        for (o, i) in out.iter_mut().zip(input) {
            *o = f(i);
        }
        Ok(Status::SUCCESS)
    })
    .unwrap();
    (m, s_in, s_out)
}

/// Source whose frame `f` holds `[10 * f, 10 * f + 1]`
fn source(n_frames: usize) -> Initializer<i32> {
    let mut ini = Initializer::<i32>::new(N_ELMTS, 0).unwrap();
    ini.set_n_frames(n_frames).unwrap();
    let rows: Vec<Vec<i32>> = (0..n_frames as i32).map(|f| vec![10 * f, 10 * f + 1]).collect();
    ini.set_init_data(&rows).unwrap();
    ini
}

struct Chain {
    sequence: Sequence,
    tasks: Vec<TaskRef>,
    sink: SocketId,
    log: CallLog,
}

/// Initializer -> Incr -> Double -> Negate
fn chain(n_frames: usize, n_frames_per_wave: usize) -> Chain {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut sequence = Sequence::new();

    let ini = source(n_frames);
    let (ini_task, ini_out) = (ini.task(), ini.out());
    let ini = sequence.add_module(ini);

    let mut tasks = vec![TaskRef::new(ini, ini_task)];
    let mut prev = tasks[0].socket(ini_out);
    let mut sink = ini_out;
    let maps: [(&str, fn(i32) -> i32); 3] = [
        ("Incr", |x| x + 1),
        ("Double", |x| x * 2),
        ("Negate", |x| -x),
    ];
    for (name, f) in maps {
        let (m, s_in, s_out) = map(name, f, &log);
        let id = sequence.add_module(m);
        let task = sequence.task_ref(id, "map").unwrap();
        sequence.set_n_frames(n_frames).unwrap();
        sequence.bind(prev, task.socket(s_in)).unwrap();
        prev = task.socket(s_out);
        tasks.push(task);
        sink = s_out;
    }
    sequence.set_n_frames(n_frames).unwrap();
    sequence.set_n_frames_per_wave(n_frames_per_wave).unwrap();

    Chain {
        sequence,
        tasks,
        sink,
        log,
    }
}

fn expected(n_frames: usize) -> Vec<i32> {
    (0..n_frames as i32)
        .flat_map(|f| [-(10 * f + 1) * 2, -(10 * f + 2) * 2])
        .collect()
}

fn sink_data(pipeline: &Pipeline, task: TaskRef, socket: SocketId) -> Vec<i32> {
    let stage = pipeline.stage_of(task).unwrap();
    pipeline
        .stage_sequence(stage)
        .unwrap()
        .socket(task.socket(socket))
        .unwrap()
        .data::<i32>()
        .unwrap()
        .to_vec()
}

#[test]
fn test_chain_output_matches_sequential_execution() {
    let mut c = chain(6, 2);
    let sink_task = c.tasks[3];
    let mut pipeline = Pipeline::new(
        &c.sequence,
        vec![c.tasks[..2].to_vec(), c.tasks[2..].to_vec()],
        PipelineConfig::default(),
    )
    .unwrap();

    let report = pipeline.run().unwrap();
    assert!(report.is_success());
    assert_eq!(report.waves_completed, 3);
    assert_eq!(report.frames_processed, 6);
    assert_eq!(sink_data(&pipeline, sink_task, c.sink), expected(6));

    c.sequence.exec().unwrap();
    let sequential = c
        .sequence
        .socket(sink_task.socket(c.sink))
        .unwrap()
        .data::<i32>()
        .unwrap()
        .to_vec();
    assert_eq!(sequential, expected(6));
}

#[test]
fn test_every_frame_processed_once_per_task() {
    let c = chain(7, 2);
    let scheduler = BalancedScheduler::new(c.sequence);
    let mut pipeline = scheduler.generate_pipeline(3).unwrap();
    pipeline.run().unwrap();

    let log = c.log.lock().unwrap();
    let mut covered: HashMap<String, Vec<usize>> = HashMap::new();
    for (module, frame, len) in log.iter() {
        covered
            .entry(module.clone())
            .or_default()
            .extend(*frame..frame + len);
    }
    assert_eq!(covered.len(), 3);
    for (module, mut frames) in covered {
        frames.sort();
        assert_eq!(frames, (0..7).collect::<Vec<_>>(), "coverage of {}", module);
    }
}

#[test]
fn test_final_partial_wave() {
    let c = chain(5, 2);
    let mut pipeline = Pipeline::new(
        &c.sequence,
        vec![vec![c.tasks[0]], c.tasks[1..].to_vec()],
        PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(pipeline.run_wave().unwrap(), Some(0));
    assert_eq!(pipeline.run_wave().unwrap(), Some(2));
    assert_eq!(pipeline.run_wave().unwrap(), Some(4));
    assert_eq!(pipeline.run_wave().unwrap(), None);
    let report = pipeline.finish().unwrap();
    assert_eq!(report.waves_completed, 3);
    assert_eq!(report.frames_processed, 5);

    let incr: Vec<(usize, usize)> = c
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _, _)| m == "Incr")
        .map(|(_, f, n)| (*f, *n))
        .collect();
    assert_eq!(incr, vec![(0, 2), (2, 2), (4, 1)]);
}

#[test]
fn test_waves_reach_each_stage_in_order() {
    let c = chain(8, 1);
    let mut pipeline = Pipeline::new(
        &c.sequence,
        c.tasks.iter().map(|&t| vec![t]).collect(),
        PipelineConfig::default().with_queue_capacity(1),
    )
    .unwrap();
    pipeline.run().unwrap();

    let log = c.log.lock().unwrap();
    for module in ["Incr", "Double", "Negate"] {
        let frames: Vec<usize> = log
            .iter()
            .filter(|(m, _, _)| m == module)
            .map(|(_, f, _)| *f)
            .collect();
        assert_eq!(frames, (0..8).collect::<Vec<_>>());
    }
}

#[test]
fn test_skip_connection_across_stages() {
    // Initializer feeds both Incr (stage 1) and Sum (stage 2)
    let n_frames = 4;
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut sequence = Sequence::new();
    let ini = source(n_frames);
    let (ini_task, ini_out) = (ini.task(), ini.out());
    let ini = TaskRef::new(sequence.add_module(ini), ini_task);
    let (incr, incr_in, incr_out) = map("Incr", |x| x + 1, &log);
    let incr = sequence.add_module(incr);

    let mut sum = Stateless::new("Sum");
    let t = sum.create_task("sum").unwrap();
    let s_a = sum.create_socket_in::<i32>(t, "a", N_ELMTS).unwrap();
    let s_b = sum.create_socket_in::<i32>(t, "b", N_ELMTS).unwrap();
    let s_out = sum.create_socket_out::<i32>(t, "out", N_ELMTS).unwrap();
    sum.create_codelet(t, move |m: &mut Stateless, t: TaskId, frame| {
        let n = m.core().wave_len(frame);
        let a = m.core().socket(t, s_a)?.frames::<i32>(frame, n)?.to_vec();
        let b = m.core().socket(t, s_b)?.frames::<i32>(frame, n)?.to_vec();
        let out = m.core_mut().socket_mut(t, s_out)?.frames_mut::<i32>(frame, n)?;
        for ((o, a), b) in out.iter_mut().zip(a).zip(b) {
            *o = a + b;
        }
        Ok(Status::SUCCESS)
    })
    .unwrap();
    let sum = sequence.add_module(sum);
    sequence.set_n_frames(n_frames).unwrap();

    let incr = sequence.task_ref(incr, "map").unwrap();
    let sum = sequence.task_ref(sum, "sum").unwrap();
    sequence.bind(ini.socket(ini_out), incr.socket(incr_in)).unwrap();
    sequence.bind(incr.socket(incr_out), sum.socket(s_a)).unwrap();
    sequence.bind(ini.socket(ini_out), sum.socket(s_b)).unwrap();

    let mut pipeline = Pipeline::new(
        &sequence,
        vec![vec![ini], vec![incr], vec![sum]],
        PipelineConfig::default(),
    )
    .unwrap();
    pipeline.run().unwrap();

    let expected: Vec<i32> = (0..n_frames as i32)
        .flat_map(|f| [2 * (10 * f) + 1, 2 * (10 * f + 1) + 1])
        .collect();
    assert_eq!(sink_data(&pipeline, sum, s_out), expected);
}

#[test]
fn test_forward_socket_updates_in_place() {
    let n_frames = 3;
    let mut sequence = Sequence::new();
    let ini = source(n_frames);
    let (ini_task, ini_out) = (ini.task(), ini.out());
    let ini = TaskRef::new(sequence.add_module(ini), ini_task);

    let mut square = Stateless::new("Square");
    let t = square.create_task("square").unwrap();
    let s_fwd = square.create_socket_fwd::<i32>(t, "data", N_ELMTS).unwrap();
    square
        .create_codelet(t, move |m: &mut Stateless, t: TaskId, frame| {
            let n = m.core().wave_len(frame);
            for x in m.core_mut().socket_mut(t, s_fwd)?.frames_mut::<i32>(frame, n)? {
                let v = *x;
                *x = v * v;
            }
            Ok(Status::SUCCESS)
        })
        .unwrap();
    let square = sequence.add_module(square);
    let (negate, neg_in, neg_out) = map("Negate", |x| -x, &Arc::new(Mutex::new(Vec::new())));
    let negate = sequence.add_module(negate);
    sequence.set_n_frames(n_frames).unwrap();

    let square = sequence.task_ref(square, "square").unwrap();
    let negate = sequence.task_ref(negate, "map").unwrap();
    sequence.bind(ini.socket(ini_out), square.socket(s_fwd)).unwrap();
    sequence.bind(square.socket(s_fwd), negate.socket(neg_in)).unwrap();

    let scheduler = BalancedScheduler::new(sequence);
    let mut pipeline = scheduler.generate_pipeline(3).unwrap();
    pipeline.run().unwrap();

    let expected: Vec<i32> = (0..n_frames as i32)
        .flat_map(|f| [-(10 * f) * (10 * f), -(10 * f + 1) * (10 * f + 1)])
        .collect();
    assert_eq!(sink_data(&pipeline, negate, neg_out), expected);
}

#[test]
fn test_stage_assignment_accessors() {
    let c = chain(4, 1);
    let pipeline = Pipeline::new(
        &c.sequence,
        vec![c.tasks[..3].to_vec(), vec![c.tasks[3]]],
        PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(pipeline.n_stages(), 2);
    assert_eq!(pipeline.stages()[0], &c.tasks[..3]);
    assert_eq!(pipeline.stage_of(c.tasks[1]), Some(0));
    assert_eq!(pipeline.stage_of(c.tasks[3]), Some(1));
    assert_eq!(pipeline.n_frames(), 4);
    assert_eq!(pipeline.n_frames_per_wave(), 1);
}

#[test]
fn test_invalid_partitions_are_rejected() {
    let c = chain(4, 1);
    let t = &c.tasks;
    let config = PipelineConfig::default;

    // consumer before producer
    let err = Pipeline::new(&c.sequence, vec![vec![t[1]], vec![t[0], t[2], t[3]]], config())
        .unwrap_err();
    assert!(err.is_scheduling());

    // missing task
    let err = Pipeline::new(&c.sequence, vec![t[..3].to_vec()], config()).unwrap_err();
    assert!(err.is_scheduling());

    // duplicated task
    let err = Pipeline::new(&c.sequence, vec![t[..3].to_vec(), t[2..].to_vec()], config())
        .unwrap_err();
    assert!(err.is_scheduling());

    // empty stage
    let err = Pipeline::new(&c.sequence, vec![t.to_vec(), vec![]], config()).unwrap_err();
    assert!(err.is_scheduling());

    let err = Pipeline::new(&c.sequence, vec![t.to_vec()], config().with_queue_capacity(0))
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_stage_sequences_do_not_touch_the_original() {
    let c = chain(4, 2);
    let sink_task = c.tasks[3];
    let mut pipeline =
        Pipeline::new(&c.sequence, vec![c.tasks.clone()], PipelineConfig::default()).unwrap();
    pipeline.run().unwrap();

    assert_eq!(sink_data(&pipeline, sink_task, c.sink), expected(4));
    let original = c
        .sequence
        .socket(sink_task.socket(c.sink))
        .unwrap()
        .data::<i32>()
        .unwrap();
    assert!(original.iter().all(|&x| x == 0));
}
