//! Monitor configuration. Defaults match the command-line defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// A resource a hog can be ranked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Memory,
    BlockIo,
    Cpu,
}

impl Dimension {
    /// Selection pass order. CPU runs last.
    pub const PASS_ORDER: [Dimension; 3] = [Dimension::Memory, Dimension::BlockIo, Dimension::Cpu];
}

/// Which dimensions are ranked. Defaults to CPU only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub cpu: bool,
    pub memory: bool,
    pub block_io: bool,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: false,
            block_io: false,
        }
    }
}

impl Dimensions {
    /// Builds the set from individual flags; none set means CPU only.
    pub fn from_flags(cpu: bool, memory: bool, block_io: bool) -> Self {
        if !(cpu || memory || block_io) {
            return Self::default();
        }
        Self {
            cpu,
            memory,
            block_io,
        }
    }

    pub fn contains(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory,
            Dimension::BlockIo => self.block_io,
        }
    }

    /// Requested dimensions in pass order.
    pub fn passes(&self) -> impl Iterator<Item = Dimension> + '_ {
        Dimension::PASS_ORDER
            .into_iter()
            .filter(move |d| self.contains(*d))
    }
}

/// Minimum value for a task to be shown, per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HogFloors {
    /// milli-CPUs: 1000 is one whole CPU.
    pub cpu: u64,
    /// mrams: thousandths of RAM.
    pub memory: u64,
    /// ms of block I/O wait per second.
    pub block_io: u64,
}

impl Default for HogFloors {
    fn default() -> Self {
        Self {
            cpu: 100,
            memory: 100,
            block_io: 100,
        }
    }
}

impl HogFloors {
    pub fn get(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory,
            Dimension::BlockIo => self.block_io,
        }
    }
}

/// Thresholds above which the host counts as busy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BusyThresholds {
    pub loadavg: f64,
    /// Percent.
    pub cpu_pct: f64,
    /// Percent.
    pub mem_pct: f64,
    pub mem_pressure: u64,
}

impl Default for BusyThresholds {
    fn default() -> Self {
        Self {
            loadavg: 5.0,
            cpu_pct: 80.0,
            mem_pct: 80.0,
            mem_pressure: 100,
        }
    }
}

/// A `path,name` disk registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpec {
    pub path: PathBuf,
    pub name: String,
}

impl FromStr for DiskSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, name) = s
            .split_once(',')
            .ok_or_else(|| format!("expected PATH,NAME, got '{}'", s))?;
        let (path, name) = (path.trim(), name.trim());
        if path.is_empty() || name.is_empty() {
            return Err(format!("expected PATH,NAME, got '{}'", s));
        }
        Ok(Self {
            path: PathBuf::from(path),
            name: name.to_string(),
        })
    }
}

/// A header counter of tasks whose name contains `needle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCounter {
    pub label: String,
    pub needle: String,
}

impl NameCounter {
    pub fn new(label: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            needle: needle.into(),
        }
    }

    pub fn php() -> Self {
        Self::new("PHP", "php")
    }

    pub fn httpd() -> Self {
        Self::new("httpd", "httpd")
    }
}

/// Everything the monitor loop needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorConfig {
    pub dimensions: Dimensions,
    pub counters: Vec<NameCounter>,
    /// Watch cadence.
    pub coarse_interval: Duration,
    /// Inspect cadence.
    pub fine_interval: Duration,
    pub busy: BusyThresholds,
    pub floors: HogFloors,
    /// Tasks taken from each dimension's sorted pass.
    pub max_results: usize,
    /// Bytes of command line read for each shown task.
    pub cmdline_len: usize,
    pub disks: Vec<DiskSpec>,
    pub proc_path: PathBuf,
    pub sys_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::default(),
            counters: Vec::new(),
            coarse_interval: Duration::from_secs(10),
            fine_interval: Duration::from_secs(10),
            busy: BusyThresholds::default(),
            floors: HogFloors::default(),
            max_results: 10,
            cmdline_len: 48,
            disks: Vec::new(),
            proc_path: PathBuf::from("/proc"),
            sys_path: PathBuf::from("/sys"),
        }
    }
}

impl MonitorConfig {
    /// Wait between the baseline snapshot and the first ranking pass.
    pub fn settle_interval(&self) -> Duration {
        self.coarse_interval.min(self.fine_interval)
    }

    /// Memory pressure is only read when it can trip the busy test.
    pub fn reads_pressure(&self) -> bool {
        self.busy.mem_pressure > 0
    }
}
