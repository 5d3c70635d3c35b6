//! Differencing and ranking of two snapshots.
//!
//! Snapshots are merge-joined on task id, which requires both to be in
//! strictly ascending id order. Joined pairs carry precomputed rates so the
//! per-dimension sort passes compare plain integers.
//!
//! ```text
//!  prior:  1   2   5       9
//!  latest: 1   2       7   9   12
//!          ^   ^   ^   ^   ^   ^
//!        join join |  new join new
//!                exited
//! ```
//!
//! Tasks that appear only in `latest` have no baseline and are left out until
//! the next cycle; tasks only in `prior` have exited.

use std::cmp::{Ordering, Reverse};
use std::time::Duration;

use serde::Serialize;

use crate::config::{Dimension, Dimensions, HogFloors};
use crate::error::RankError;
use crate::model::SystemSnapshot;

/// Shortest interval rates are computed over.
const MIN_ELAPSED_SECS: f64 = 0.001;

/// A task present in both snapshots, with its rates over the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JoinedTask {
    pub prior_index: usize,
    pub latest_index: usize,
    /// milli-CPUs per CPU: 1000 means one CPU saturated for the interval.
    pub cpu_rate: u64,
    /// mrams at the latest snapshot.
    pub mem_level: u64,
    /// ms of block I/O wait per second.
    pub io_rate: u64,
    pub selected: bool,
}

impl JoinedTask {
    pub fn value(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Cpu => self.cpu_rate,
            Dimension::Memory => self.mem_level,
            Dimension::BlockIo => self.io_rate,
        }
    }
}

/// Inputs to [`rank`] other than the snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankParams {
    /// Time between the two snapshots.
    pub elapsed: Duration,
    pub dimensions: Dimensions,
    pub floors: HogFloors,
    pub max_results: usize,
    pub cpu_count: u32,
}

/// How a ranking pass came out, for choosing what to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No task was present in both snapshots.
    NoJoinedTasks,
    /// Tasks were joined but none met a floor.
    NoHogs,
    Hogs,
}

/// Result of one ranking pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    /// Every joined task in display order: CPU rate, memory level and I/O rate
    /// descending, then id ascending.
    pub joined: Vec<JoinedTask>,
}

impl Ranking {
    pub fn verdict(&self) -> Verdict {
        if self.joined.is_empty() {
            Verdict::NoJoinedTasks
        } else if self.joined.iter().any(|t| t.selected) {
            Verdict::Hogs
        } else {
            Verdict::NoHogs
        }
    }

    pub fn selected(&self) -> impl Iterator<Item = &JoinedTask> {
        self.joined.iter().filter(|t| t.selected)
    }
}

fn check_ascending(snapshot: &SystemSnapshot, side: &'static str) -> Result<(), RankError> {
    for (position, pair) in snapshot.samples().windows(2).enumerate() {
        if pair[1].id <= pair[0].id {
            return Err(RankError::OutOfOrder {
                side,
                position: position + 1,
                previous: pair[0].id,
                current: pair[1].id,
            });
        }
    }
    Ok(())
}

/// Walks both snapshots in id order, calling `on_pair` for every id present in
/// both. Returns the number of id comparisons made, at most `n + m`.
pub fn merge_join_with(
    prior: &SystemSnapshot,
    latest: &SystemSnapshot,
    mut on_pair: impl FnMut(usize, usize),
) -> Result<usize, RankError> {
    check_ascending(prior, "prior")?;
    check_ascending(latest, "latest")?;

    let (p, l) = (prior.samples(), latest.samples());
    let (mut i, mut j) = (0, 0);
    let mut comparisons = 0;

    while i < p.len() && j < l.len() {
        comparisons += 1;
        match p[i].id.cmp(&l[j].id) {
            Ordering::Equal => {
                on_pair(i, j);
                i += 1;
                j += 1;
            }
            // Exited since the prior snapshot.
            Ordering::Less => i += 1,
            // New since the prior snapshot; no baseline yet.
            Ordering::Greater => j += 1,
        }
    }

    Ok(comparisons)
}

/// Joins two snapshots and computes per-task rates.
///
/// Counters that went backwards yield a zero delta.
pub fn merge_join(
    prior: &SystemSnapshot,
    latest: &SystemSnapshot,
    elapsed: Duration,
    cpu_count: u32,
) -> Result<Vec<JoinedTask>, RankError> {
    let elapsed_secs = elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
    let cpus = f64::from(cpu_count.max(1));

    let mut joined = Vec::with_capacity(prior.count().min(latest.count()));
    merge_join_with(prior, latest, |i, j| {
        let (before, after) = (&prior.samples()[i], &latest.samples()[j]);
        let cpu_ms = after.cpu_time_ms.saturating_sub(before.cpu_time_ms);
        let io_ms = after.block_io_wait_ms.saturating_sub(before.block_io_wait_ms);

        joined.push(JoinedTask {
            prior_index: i,
            latest_index: j,
            cpu_rate: (cpu_ms as f64 / elapsed_secs / cpus) as u64,
            mem_level: after.resident_mem_permille,
            io_rate: (io_ms as f64 / elapsed_secs) as u64,
            selected: false,
        });
    })?;

    Ok(joined)
}

/// Marks the hogs among tasks present in both snapshots.
///
/// For each requested dimension (memory, block I/O, then CPU) the joined set
/// is sorted descending on that dimension, and each of the first
/// `max_results` tasks is selected if its value meets the floor. Selection
/// accumulates across dimensions.
pub fn rank(
    prior: &SystemSnapshot,
    latest: &SystemSnapshot,
    params: &RankParams,
) -> Result<Ranking, RankError> {
    let mut joined = merge_join(prior, latest, params.elapsed, params.cpu_count)?;

    for dimension in params.dimensions.passes() {
        joined.sort_unstable_by_key(|t| (Reverse(t.value(dimension)), t.latest_index));
        let floor = params.floors.get(dimension);
        for task in joined.iter_mut().take(params.max_results) {
            if task.value(dimension) >= floor {
                task.selected = true;
            }
        }
    }

    joined.sort_unstable_by_key(|t| {
        (
            Reverse(t.cpu_rate),
            Reverse(t.mem_level),
            Reverse(t.io_rate),
            t.latest_index,
        )
    });

    Ok(Ranking { joined })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskSample;

    fn task(id: u32, cpu_time_ms: u64) -> TaskSample {
        TaskSample {
            id,
            name: format!("t{}", id),
            cpu_time_ms,
            resident_mem_permille: 0,
            block_io_wait_ms: 0,
        }
    }

    fn snap(tasks: Vec<TaskSample>) -> SystemSnapshot {
        SystemSnapshot::from_samples(tasks)
    }

    fn params(floor: u64) -> RankParams {
        RankParams {
            elapsed: Duration::from_secs(1),
            dimensions: Dimensions::default(),
            floors: HogFloors {
                cpu: floor,
                ..HogFloors::default()
            },
            max_results: 10,
            cpu_count: 1,
        }
    }

    fn ids(ranking: &Ranking, latest: &SystemSnapshot) -> Vec<u32> {
        ranking
            .joined
            .iter()
            .map(|t| latest.samples()[t.latest_index].id)
            .collect()
    }

    #[test]
    fn test_new_task_excluded_from_join() {
        let prior = snap(vec![task(1, 1000), task(2, 2000)]);
        let latest = snap(vec![task(1, 1000), task(2, 2700), task(3, 500)]);

        let joined = merge_join(&prior, &latest, Duration::from_secs(1), 1).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(latest.samples()[joined[0].latest_index].id, 1);
        assert_eq!(joined[0].cpu_rate, 0);
        assert_eq!(latest.samples()[joined[1].latest_index].id, 2);
        assert_eq!(joined[1].cpu_rate, 700);
    }

    #[test]
    fn test_floor_selects_hogs() {
        let prior = snap(vec![task(1, 1000), task(2, 2000)]);
        let latest = snap(vec![task(1, 1000), task(2, 2700), task(3, 500)]);

        let ranking = rank(&prior, &latest, &params(500)).unwrap();
        let selected: Vec<u32> = ranking
            .selected()
            .map(|t| latest.samples()[t.latest_index].id)
            .collect();
        assert_eq!(selected, vec![2]);
        assert_eq!(ranking.verdict(), Verdict::Hogs);

        let ranking = rank(&prior, &latest, &params(0)).unwrap();
        assert_eq!(ranking.selected().count(), 2);
        assert_eq!(ids(&ranking, &latest), vec![2, 1]);
    }

    #[test]
    fn test_disjoint_snapshots_join_nothing() {
        let prior = snap(vec![task(1, 10), task(3, 10)]);
        let latest = snap(vec![task(2, 10), task(4, 10)]);

        let ranking = rank(&prior, &latest, &params(0)).unwrap();
        assert!(ranking.joined.is_empty());
        assert_eq!(ranking.verdict(), Verdict::NoJoinedTasks);
    }

    #[test]
    fn test_no_hogs_distinct_from_no_tasks() {
        let prior = snap(vec![task(1, 1000)]);
        let latest = snap(vec![task(1, 1010)]);

        let ranking = rank(&prior, &latest, &params(500)).unwrap();
        assert_eq!(ranking.joined.len(), 1);
        assert_eq!(ranking.verdict(), Verdict::NoHogs);
    }

    #[test]
    fn test_decreasing_counters_give_zero() {
        let mut before = task(5, 9000);
        before.block_io_wait_ms = 400;
        let mut after = task(5, 100);
        after.block_io_wait_ms = 10;

        let joined = merge_join(&snap(vec![before]), &snap(vec![after]), Duration::from_secs(1), 1)
            .unwrap();
        assert_eq!(joined[0].cpu_rate, 0);
        assert_eq!(joined[0].io_rate, 0);
    }

    #[test]
    fn test_rates_scale_by_elapsed_and_cpus() {
        let mut before = task(8, 0);
        before.block_io_wait_ms = 0;
        let mut after = task(8, 8000);
        after.block_io_wait_ms = 3000;
        after.resident_mem_permille = 42;

        let joined =
            merge_join(&snap(vec![before]), &snap(vec![after]), Duration::from_secs(2), 4).unwrap();
        assert_eq!(joined[0].cpu_rate, 1000);
        assert_eq!(joined[0].io_rate, 1500);
        assert_eq!(joined[0].mem_level, 42);
    }

    #[test]
    fn test_zero_elapsed_is_floored() {
        let joined = merge_join(
            &snap(vec![task(1, 0)]),
            &snap(vec![task(1, 1)]),
            Duration::ZERO,
            1,
        )
        .unwrap();
        assert_eq!(joined[0].cpu_rate, 1000);
    }

    #[test]
    fn test_out_of_order_latest_is_fatal() {
        let prior = snap(vec![task(1, 0), task(2, 0)]);
        let latest = snap(vec![task(1, 0), task(7, 0), task(3, 0)]);

        let err = rank(&prior, &latest, &params(0)).unwrap_err();
        assert_eq!(
            err,
            RankError::OutOfOrder {
                side: "latest",
                position: 2,
                previous: 7,
                current: 3
            }
        );
    }

    #[test]
    fn test_duplicate_ids_are_fatal() {
        let prior = snap(vec![task(4, 0), task(4, 0)]);
        let latest = snap(vec![task(4, 0)]);
        assert!(matches!(
            merge_join(&prior, &latest, Duration::from_secs(1), 1),
            Err(RankError::OutOfOrder { side: "prior", .. })
        ));
    }

    #[test]
    fn test_merge_join_is_linear() {
        let prior = snap((1..=50).map(|id| task(id * 2, 0)).collect());
        let latest = snap((1..=70).map(|id| task(id * 3, 0)).collect());

        let mut pairs = 0;
        let comparisons = merge_join_with(&prior, &latest, |_, _| pairs += 1).unwrap();
        assert!(comparisons <= 50 + 70);
        // Multiples of 6 up to 100.
        assert_eq!(pairs, 16);
    }

    #[test]
    fn test_max_results_caps_each_pass() {
        let prior = snap((1..=5).map(|id| task(id, 0)).collect());
        let latest = snap((1..=5).map(|id| task(id, u64::from(id) * 1000)).collect());

        let ranking = rank(
            &prior,
            &latest,
            &RankParams {
                max_results: 2,
                ..params(0)
            },
        )
        .unwrap();
        let selected: Vec<u32> = ranking
            .selected()
            .map(|t| latest.samples()[t.latest_index].id)
            .collect();
        assert_eq!(selected, vec![5, 4]);
    }

    #[test]
    fn test_selection_accumulates_across_dimensions() {
        let prior = snap(vec![task(1, 0), task(2, 0), task(3, 0)]);
        let mut latest = vec![task(1, 900), task(2, 10), task(3, 0)];
        latest[1].resident_mem_permille = 600;
        latest[2].block_io_wait_ms = 700;
        let latest = snap(latest);

        let ranking = rank(
            &prior,
            &latest,
            &RankParams {
                dimensions: Dimensions::from_flags(true, true, true),
                floors: HogFloors {
                    cpu: 500,
                    memory: 500,
                    block_io: 500,
                },
                max_results: 1,
                ..params(0)
            },
        )
        .unwrap();

        assert_eq!(ranking.selected().count(), 3);
        // Display order: CPU first, then memory, then I/O.
        assert_eq!(ids(&ranking, &latest), vec![1, 2, 3]);
    }

    #[test]
    fn test_unrequested_dimension_never_selects() {
        let prior = snap(vec![task(1, 0)]);
        let mut after = task(1, 0);
        after.resident_mem_permille = 999;
        let latest = snap(vec![after]);

        let ranking = rank(&prior, &latest, &params(100)).unwrap();
        assert_eq!(ranking.verdict(), Verdict::NoHogs);
    }

    #[test]
    fn test_identical_snapshots_have_zero_cpu_rate() {
        let snapshot = snap(vec![task(1, 5000), task(2, 7000), task(9, 1)]);
        let joined = merge_join(&snapshot, &snapshot.clone(), Duration::from_millis(5), 2).unwrap();
        assert_eq!(joined.len(), 3);
        assert!(joined.iter().all(|t| t.cpu_rate == 0 && t.io_rate == 0));
    }
}
