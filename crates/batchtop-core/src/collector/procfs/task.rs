//! Task collector: builds a [`SystemSnapshot`] from `/proc/[pid]/stat`.

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::collector::host::HostContext;
use crate::collector::procfs::parser::{TaskStat, parse_task_stat};
use crate::collector::traits::FileSystem;
use crate::error::CollectError;
use crate::model::{SystemSnapshot, TaskSample};

/// Bytes read from each stat file; records are far shorter in practice.
const STAT_READ_LIMIT: usize = 800;

/// Shown in place of a command line that could not be read.
pub const UNKNOWN_CMDLINE: &str = "<unknown>";

/// Collects per-task usage from `/proc/[pid]/`.
pub struct TaskCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    host: HostContext,
    /// Reused for every stat and cmdline read.
    scratch: Vec<u8>,
}

impl<F: FileSystem> TaskCollector<F> {
    /// Creates a new task collector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `host` - Conversion constants for ticks and pages
    pub fn new(fs: F, proc_path: impl Into<PathBuf>, host: HostContext) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            host,
            scratch: Vec::with_capacity(STAT_READ_LIMIT),
        }
    }

    /// Reads one task.
    ///
    /// Returns `Ok(None)` when the task is gone (its stat file cannot be opened
    /// or read). A record that reads but does not parse is fatal.
    pub fn collect_task(&mut self, pid: u32) -> Result<Option<TaskSample>, CollectError> {
        let path = self.proc_path.join(pid.to_string()).join("stat");
        match self.fs.read_prefix(&path, &mut self.scratch, STAT_READ_LIMIT) {
            Ok(0) | Err(_) => return Ok(None),
            Ok(_) => {}
        }

        let content = String::from_utf8_lossy(&self.scratch);
        let stat = parse_task_stat(&content, pid).map_err(|e| CollectError::BadTaskRecord {
            pid,
            reason: e.message,
        })?;

        Ok(Some(self.to_sample(stat)))
    }

    fn to_sample(&self, stat: TaskStat) -> TaskSample {
        TaskSample {
            id: stat.pid,
            cpu_time_ms: self.host.ticks_to_ms(stat.total_cpu_ticks()),
            resident_mem_permille: self.host.pages_to_permille(stat.resident_pages()),
            block_io_wait_ms: self.host.ticks_to_ms(stat.blkio_ticks),
            name: stat.name,
        }
    }

    /// Captures every task currently visible, in ascending pid order.
    ///
    /// Capacity is reserved up front from the directory link count, a cheap
    /// upper bound on the number of task directories. Directory listing order
    /// is not guaranteed, so pids are sorted before reading (O(n log n)).
    /// Tasks that exit mid-scan are skipped.
    pub fn build_snapshot(&mut self) -> Result<SystemSnapshot, CollectError> {
        let proc_path = self.proc_path.clone();
        let bound = self
            .fs
            .link_count(&proc_path)
            .map_err(|e| CollectError::io(&proc_path, e))? as usize;
        let entries = self
            .fs
            .read_dir(&proc_path)
            .map_err(|e| CollectError::io(&proc_path, e))?;

        let mut pids: Vec<u32> = Vec::with_capacity(bound.max(entries.len()));
        pids.extend(entries.iter().filter_map(|entry| task_id(entry)));
        pids.sort_unstable();

        let mut samples = Vec::with_capacity(bound.max(pids.len()));
        for pid in pids {
            if let Some(sample) = self.collect_task(pid)? {
                samples.push(sample);
            }
        }

        trace!(tasks = samples.len(), bound, "snapshot built");
        Ok(SystemSnapshot::from_samples(samples))
    }

    /// Reads up to `max_len` bytes of a task's command line for display.
    ///
    /// Argument separators become spaces and the last byte read is dropped, so
    /// at most `max_len - 1` bytes are shown. Unreadable command lines show as
    /// `<unknown>`.
    pub fn read_cmdline(&mut self, pid: u32, max_len: usize) -> String {
        let path = self.proc_path.join(pid.to_string()).join("cmdline");
        let n = match self.fs.read_prefix(&path, &mut self.scratch, max_len) {
            Ok(n) => n,
            Err(_) => return UNKNOWN_CMDLINE.to_string(),
        };

        let shown: Vec<u8> = self.scratch[..n.saturating_sub(1)]
            .iter()
            .map(|&b| if b == 0 { b' ' } else { b })
            .collect();
        String::from_utf8_lossy(&shown).into_owned()
    }
}

/// Parses a numeric `/proc` entry name as a task id.
fn task_id(entry: &Path) -> Option<u32> {
    entry.file_name()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MOCK_RAM_KB, MockFs};

    fn host() -> HostContext {
        HostContext::new(100, 4, MOCK_RAM_KB, 4)
    }

    #[test]
    fn test_collect_single_task() {
        let fs = MockFs::typical_system();
        let mut collector = TaskCollector::new(fs, "/proc", host());

        let sample = collector.collect_task(1001).unwrap().unwrap();
        assert_eq!(sample.id, 1001);
        assert_eq!(sample.name, "php-fpm: pool");
        assert_eq!(sample.cpu_time_ms, 200_000);
        // 80_000 pages * 4 kB * 1000 / 16_384_000 kB
        assert_eq!(sample.resident_mem_permille, 19);
        assert_eq!(sample.block_io_wait_ms, 3_000);
    }

    #[test]
    fn test_collect_task_gone() {
        let fs = MockFs::new();
        fs.add_dir("/proc/9999"); // Directory exists but no files

        let mut collector = TaskCollector::new(fs, "/proc", host());
        assert_eq!(collector.collect_task(9999).unwrap(), None);
    }

    #[test]
    fn test_collect_task_pid_mismatch_is_fatal() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/77/stat", crate::collector::mock::task_stat_line(78, "x", 1, 1, 1));

        let mut collector = TaskCollector::new(fs, "/proc", host());
        let err = collector.collect_task(77).unwrap_err();
        assert!(matches!(err, CollectError::BadTaskRecord { pid: 77, .. }));
    }

    #[test]
    fn test_build_snapshot_sorted_by_id() {
        let fs = MockFs::typical_system();
        let mut collector = TaskCollector::new(fs, "/proc", host());

        let snapshot = collector.build_snapshot().unwrap();
        let ids: Vec<u32> = snapshot.samples().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 812, 1000, 1001, 1002]);
    }

    #[test]
    fn test_build_snapshot_skips_vanished_task() {
        let fs = MockFs::typical_system();
        // Listed in /proc but the stat file is already gone.
        fs.remove_file("/proc/812/stat");

        let mut collector = TaskCollector::new(fs, "/proc", host());
        let snapshot = collector.build_snapshot().unwrap();
        assert_eq!(snapshot.count(), 4);
        assert!(snapshot.samples().iter().all(|s| s.id != 812));
    }

    #[test]
    fn test_build_snapshot_malformed_record_aborts() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/1000/stat", "1000 (bash) S 1");

        let mut collector = TaskCollector::new(fs, "/proc", host());
        assert!(matches!(
            collector.build_snapshot(),
            Err(CollectError::BadTaskRecord { pid: 1000, .. })
        ));
    }

    #[test]
    fn test_read_cmdline() {
        let fs = MockFs::typical_system();
        let mut collector = TaskCollector::new(fs, "/proc", host());

        assert_eq!(collector.read_cmdline(1002, 48), "/usr/sbin/httpd -DFOREGROUND");
        // Truncated: 8 bytes read, 7 shown.
        assert_eq!(collector.read_cmdline(1002, 8), "/usr/sb");
        assert_eq!(collector.read_cmdline(4242, 48), UNKNOWN_CMDLINE);
    }

    #[test]
    fn test_read_cmdline_kernel_thread_is_empty() {
        let fs = MockFs::typical_system();
        fs.add_task(2, "kthreadd", 0, 0, 0, "");

        let mut collector = TaskCollector::new(fs, "/proc", host());
        assert_eq!(collector.read_cmdline(2, 48), "");
    }

    #[test]
    fn test_unchanged_host_ranks_no_hogs() {
        use crate::config::{Dimensions, HogFloors};
        use crate::rank::{RankParams, Verdict, rank};
        use std::time::Duration;

        let fs = MockFs::typical_system();
        let mut collector = TaskCollector::new(fs, "/proc", host());
        let prior = collector.build_snapshot().unwrap();
        let latest = collector.build_snapshot().unwrap();
        assert_eq!(prior, latest);

        let params = RankParams {
            elapsed: Duration::from_secs(1),
            dimensions: Dimensions::from_flags(true, false, true),
            floors: HogFloors {
                cpu: 1,
                memory: 1,
                block_io: 1,
            },
            max_results: 10,
            cpu_count: 4,
        };
        let ranking = rank(&prior, &latest, &params).unwrap();

        assert_eq!(ranking.joined.len(), latest.count());
        assert!(ranking.joined.iter().all(|t| t.cpu_rate == 0 && t.io_rate == 0));
        assert!(
            ranking
                .joined
                .iter()
                .all(|t| prior.samples()[t.prior_index].id == latest.samples()[t.latest_index].id)
        );
        assert_eq!(ranking.verdict(), Verdict::NoHogs);
    }
}
