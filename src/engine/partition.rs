use super::config::ProfilingConfig;
use super::scheduler::{Scheduler, SchedulerCore};
use super::sequence::{Sequence, TaskRef};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Split `weights` into `k` contiguous non-empty ranges minimizing the
/// heaviest range. Among equal optima the earliest cut wins.
pub fn linear_partition(weights: &[u64], k: usize) -> Result<Vec<Range<usize>>> {
    let n = weights.len();
    if k == 0 || k > n {
        return Err(Error::scheduling(format!(
            "cannot split {} items into {} parts",
            n, k
        )));
    }

    let mut prefix = vec![0u64; n + 1];
    for (i, w) in weights.iter().enumerate() {
        prefix[i + 1] = prefix[i].saturating_add(*w);
    }

    // cost[j][i]: best max weight for the first i items in j parts
    let mut cost = vec![vec![u64::MAX; n + 1]; k + 1];
    let mut cut = vec![vec![0usize; n + 1]; k + 1];
    for i in 1..=n {
        cost[1][i] = prefix[i];
    }
    for j in 2..=k {
        for i in j..=n {
            for p in (j - 1)..i {
                let c = cost[j - 1][p].max(prefix[i] - prefix[p]);
                if c < cost[j][i] {
                    cost[j][i] = c;
                    cut[j][i] = p;
                }
            }
        }
    }

    let mut ranges = Vec::with_capacity(k);
    let mut end = n;
    for j in (2..=k).rev() {
        let start = cut[j][end];
        ranges.push(start..end);
        end = start;
    }
    ranges.push(0..end);
    ranges.reverse();
    Ok(ranges)
}

/// Contiguous slices of the topological order with balanced profiled cost.
pub struct BalancedScheduler {
    core: SchedulerCore,
}

impl BalancedScheduler {
    pub fn new(sequence: Sequence) -> Self {
        Self {
            core: SchedulerCore::new(sequence),
        }
    }

    pub fn shared(sequence: Arc<Mutex<Sequence>>) -> Self {
        Self {
            core: SchedulerCore::shared(sequence),
        }
    }

    pub fn with_profiling(mut self, profiling: ProfilingConfig) -> Self {
        self.core.set_profiling_config(profiling);
        self
    }
}

impl Scheduler for BalancedScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn partition(
        &self,
        _sequence: &Sequence,
        order: &[TaskRef],
        n_stages: usize,
    ) -> Result<Vec<Vec<TaskRef>>> {
        let weights = self.core.task_weights(order);
        Ok(linear_partition(&weights, n_stages)?
            .into_iter()
            .map(|r| order[r].to_vec())
            .collect())
    }
}

/// Longest-path levels of the task graph, consecutive levels merged until
/// `n_stages` remain.
pub struct LevelScheduler {
    core: SchedulerCore,
}

impl LevelScheduler {
    pub fn new(sequence: Sequence) -> Self {
        Self {
            core: SchedulerCore::new(sequence),
        }
    }

    pub fn shared(sequence: Arc<Mutex<Sequence>>) -> Self {
        Self {
            core: SchedulerCore::shared(sequence),
        }
    }

    pub fn with_profiling(mut self, profiling: ProfilingConfig) -> Self {
        self.core.set_profiling_config(profiling);
        self
    }
}

/// Level of every task of `order`; sources sit at level 0
pub fn task_levels(sequence: &Sequence, order: &[TaskRef]) -> HashMap<TaskRef, usize> {
    let mut producers: HashMap<TaskRef, Vec<TaskRef>> = HashMap::new();
    for b in sequence.bindings() {
        producers
            .entry(b.to.task_ref())
            .or_default()
            .push(b.from.task_ref());
    }

    let mut levels = HashMap::with_capacity(order.len());
    for &t in order {
        let level = producers
            .get(&t)
            .into_iter()
            .flatten()
            .filter_map(|p| levels.get(p))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        levels.insert(t, level);
    }
    levels
}

impl Scheduler for LevelScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn partition(
        &self,
        sequence: &Sequence,
        order: &[TaskRef],
        n_stages: usize,
    ) -> Result<Vec<Vec<TaskRef>>> {
        let levels = task_levels(sequence, order);
        let n_levels = levels.values().max().map(|l| l + 1).unwrap_or(0);
        if n_stages > n_levels {
            return Err(Error::scheduling(format!(
                "the sequence has {} levels, cannot build {} stages",
                n_levels, n_stages
            )));
        }

        let weights = self.core.task_weights(order);
        let mut level_weights = vec![0u64; n_levels];
        for (t, w) in order.iter().zip(&weights) {
            level_weights[levels[t]] += w;
        }

        let ranges = linear_partition(&level_weights, n_stages)?;
        Ok(ranges
            .into_iter()
            .map(|r| {
                order
                    .iter()
                    .copied()
                    .filter(|t| r.contains(&levels[t]))
                    .collect()
            })
            .collect())
    }
}
