//! Point-in-time data captured by the snapshot builder.

use serde::Serialize;

/// One task's usage at the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSample {
    pub id: u32,
    /// Short name from the stat record, at most 15 characters.
    pub name: String,
    /// Own plus waited-for children CPU time, user and system, in ms.
    pub cpu_time_ms: u64,
    /// Resident set size in thousandths of total RAM ("mrams").
    pub resident_mem_permille: u64,
    /// Accumulated block I/O delay, in ms.
    pub block_io_wait_ms: u64,
}

/// Every task visible at one instant, ordered by ascending id.
///
/// Built once and never mutated; the monitor replaces it each cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemSnapshot {
    samples: Vec<TaskSample>,
}

impl SystemSnapshot {
    /// Wraps samples that the caller has already put in ascending id order.
    ///
    /// Ordering is verified by the ranking engine, not here.
    pub fn from_samples(samples: Vec<TaskSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[TaskSample] {
        &self.samples
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of tasks whose name contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.samples.iter().filter(|s| s.name.contains(needle)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u32, name: &str) -> TaskSample {
        TaskSample {
            id,
            name: name.to_string(),
            cpu_time_ms: 0,
            resident_mem_permille: 0,
            block_io_wait_ms: 0,
        }
    }

    #[test]
    fn test_count_matching() {
        let snapshot = SystemSnapshot::from_samples(vec![
            sample(1, "systemd"),
            sample(10, "php-fpm: pool"),
            sample(11, "php-fpm: pool"),
            sample(20, "httpd"),
        ]);

        assert_eq!(snapshot.count(), 4);
        assert_eq!(snapshot.count_matching("php"), 2);
        assert_eq!(snapshot.count_matching("httpd"), 1);
        assert_eq!(snapshot.count_matching("nginx"), 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SystemSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.count(), 0);
    }
}
