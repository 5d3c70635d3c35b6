//! Per-disk usage from block device `stat` files.
//!
//! Usage is the growth of the time-in-queue counter (ms with at least one
//! request in flight) per second of wall-clock time, so a disk kept busy by a
//! single stream reads about 1000.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::collector::procfs::parser::parse_disk_queue_time;
use crate::collector::traits::FileSystem;
use crate::config::DiskSpec;
use crate::error::CollectError;

/// Bytes read from each disk stat file.
const DISK_STAT_READ_LIMIT: usize = 256;

/// One registered disk and its counter at the previous sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskMonitorEntry {
    pub source_path: PathBuf,
    pub display_name: String,
    pub previous_queue_time: u32,
}

/// Usage of one disk over the last sampling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskRate {
    pub name: String,
    /// Milliseconds in queue per elapsed second.
    pub rate: u32,
}

/// Queue-time growth since the previous sample, tolerating one counter wrap.
pub fn queue_rate(previous: u32, current: u32, elapsed_secs: u64) -> u32 {
    let delta = current.wrapping_sub(previous);
    let elapsed = elapsed_secs.max(1);
    (u64::from(delta) / elapsed) as u32
}

/// Order-preserving registry of monitored disks.
pub struct DiskTracker<F: FileSystem> {
    fs: F,
    entries: Vec<DiskMonitorEntry>,
    previous_at: Option<u64>,
    scratch: Vec<u8>,
}

impl<F: FileSystem> DiskTracker<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            entries: Vec::new(),
            previous_at: None,
            scratch: Vec::with_capacity(DISK_STAT_READ_LIMIT),
        }
    }

    /// Appends a disk. Registration order is display order.
    pub fn register(&mut self, source_path: impl Into<PathBuf>, display_name: impl Into<String>) {
        self.entries.push(DiskMonitorEntry {
            source_path: source_path.into(),
            display_name: display_name.into(),
            previous_queue_time: 0,
        });
    }

    pub fn with_disks<'a>(mut self, specs: impl IntoIterator<Item = &'a DiskSpec>) -> Self {
        for spec in specs {
            self.register(&spec.path, &spec.name);
        }
        self
    }

    pub fn entries(&self) -> &[DiskMonitorEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read_queue_time(&mut self, path: &Path) -> Result<u32, CollectError> {
        self.fs
            .read_prefix(path, &mut self.scratch, DISK_STAT_READ_LIMIT)
            .map_err(|e| CollectError::io(path, e))?;
        let content = String::from_utf8_lossy(&self.scratch);
        parse_disk_queue_time(&content).map_err(|e| CollectError::malformed(path, e.message))
    }

    /// First sample, taken at startup. Any failure is fatal so a bad `-d`
    /// path is caught before the first busy cycle.
    pub fn prime(&mut self, now_secs: u64) -> Result<Vec<DiskRate>, CollectError> {
        self.sample_inner(now_secs, true)
    }

    /// Samples every registered disk and advances each window.
    ///
    /// A missing or unparsable queue-time field is fatal. An I/O error on the
    /// file is logged, reported as rate 0, and leaves the previous counter.
    pub fn sample(&mut self, now_secs: u64) -> Result<Vec<DiskRate>, CollectError> {
        self.sample_inner(now_secs, false)
    }

    fn sample_inner(&mut self, now_secs: u64, strict: bool) -> Result<Vec<DiskRate>, CollectError> {
        let elapsed = match self.previous_at {
            Some(prev) => now_secs.saturating_sub(prev),
            None => 1,
        };

        let mut rates = Vec::with_capacity(self.entries.len());
        for idx in 0..self.entries.len() {
            let path = self.entries[idx].source_path.clone();
            let current = match self.read_queue_time(&path) {
                Ok(current) => Some(current),
                Err(CollectError::Io { path, source }) if !strict => {
                    warn!("cannot read {}: {}, reporting 0", path.display(), source);
                    None
                }
                Err(e) => return Err(e),
            };

            let entry = &mut self.entries[idx];
            let rate = match current {
                Some(current) => {
                    let rate = queue_rate(entry.previous_queue_time, current, elapsed);
                    entry.previous_queue_time = current;
                    rate
                }
                None => 0,
            };
            rates.push(DiskRate {
                name: entry.display_name.clone(),
                rate,
            });
        }

        self.previous_at = Some(now_secs);
        Ok(rates)
    }
}
