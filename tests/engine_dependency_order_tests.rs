use proptest::prelude::*;
use std::collections::HashMap;
use wavepipe::core::{SocketId, Status, TaskId};
use wavepipe::engine::{
    task_levels, BalancedScheduler, LevelScheduler, Scheduler, Sequence, TaskRef,
};
use wavepipe::modules::Stateless;

/// Random DAG: module `perm[i]` holds the i-th task in dependency order, so
/// module insertion order does not match data flow.
fn random_dag(n: usize, edges: &[bool], perm: &[usize]) -> Sequence {
    let mut sequence = Sequence::new();
    let mut outs = HashMap::new();
    let mut ins: HashMap<usize, Vec<SocketId>> = HashMap::new();
    let mut ids = vec![None; n];
    // insert modules in permuted order
    for &rank in perm {
        let mut m = Stateless::new(format!("N{}", rank));
        let t = m.create_task("run").unwrap();
        let sockets = (0..n)
            .map(|i| m.create_socket_in::<i8>(t, &format!("in{}", i), 1).unwrap())
            .collect();
        outs.insert(rank, m.create_socket_out::<i8>(t, "out", 1).unwrap());
        ins.insert(rank, sockets);
        m.create_codelet(t, |_: &mut Stateless, _: TaskId, _| Ok(Status::SUCCESS))
            .unwrap();
        ids[rank] = Some(sequence.add_module(m));
    }
    let tasks: Vec<TaskRef> = ids
        .iter()
        .map(|id| sequence.task_ref(id.unwrap(), "run").unwrap())
        .collect();

    let mut k = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if edges[k] {
                sequence
                    .bind(tasks[i].socket(outs[&i]), tasks[j].socket(ins[&j][i]))
                    .unwrap();
            }
            k += 1;
        }
    }
    sequence.set_n_frames(2).unwrap();
    sequence
}

fn dag_strategy() -> impl Strategy<Value = (usize, Vec<bool>, Vec<usize>)> {
    (2usize..8).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec(any::<bool>(), n * (n - 1) / 2),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn topological_order_respects_bindings((n, edges, perm) in dag_strategy()) {
        let sequence = random_dag(n, &edges, &perm);
        let order = sequence.topological_order().unwrap();
        prop_assert_eq!(order.len(), n);
        let position: HashMap<TaskRef, usize> =
            order.iter().enumerate().map(|(i, &t)| (t, i)).collect();
        for b in sequence.bindings() {
            prop_assert!(position[&b.from.task_ref()] < position[&b.to.task_ref()]);
        }
    }

    #[test]
    fn balanced_stages_never_flow_backwards(
        (n, edges, perm) in dag_strategy(),
        stages in 1usize..8,
    ) {
        let n_stages = stages.min(n);
        let scheduler = BalancedScheduler::new(random_dag(n, &edges, &perm));
        let pipeline = scheduler.generate_pipeline(n_stages).unwrap();
        prop_assert_eq!(pipeline.n_stages(), n_stages);

        let handle = scheduler.core().sequence();
        let sequence = handle.lock().unwrap();
        for b in sequence.bindings() {
            let from = pipeline.stage_of(b.from.task_ref()).unwrap();
            let to = pipeline.stage_of(b.to.task_ref()).unwrap();
            prop_assert!(from <= to);
        }
    }

    #[test]
    fn level_stages_never_flow_backwards(
        (n, edges, perm) in dag_strategy(),
        stages in 1usize..8,
    ) {
        let sequence = random_dag(n, &edges, &perm);
        let order = sequence.topological_order().unwrap();
        let n_levels = task_levels(&sequence, &order).values().max().unwrap() + 1;
        let n_stages = stages.min(n_levels);

        let scheduler = LevelScheduler::new(sequence);
        let pipeline = scheduler.generate_pipeline(n_stages).unwrap();
        prop_assert_eq!(pipeline.n_stages(), n_stages);

        let handle = scheduler.core().sequence();
        let sequence = handle.lock().unwrap();
        for b in sequence.bindings() {
            let from = pipeline.stage_of(b.from.task_ref()).unwrap();
            let to = pipeline.stage_of(b.to.task_ref()).unwrap();
            prop_assert!(from <= to);
        }
    }
}
