//! Parsers for `/proc` and `/sys` file contents.
//!
//! These are pure functions over the text of a single file, so each one can be
//! exercised with string inputs. Callers attach the path and decide whether a
//! failure is fatal.

use std::path::PathBuf;

/// Longest task name the kernel reports (`TASK_COMM_LEN` minus the NUL).
pub const TASK_NAME_LEN: usize = 15;

/// Shortest plausible tail of a task stat record after the name field.
const MIN_STAT_TAIL_LEN: usize = 50;

/// Positions of the fields we need, counted from the state field after `)`.
const UTIME_FIELD: usize = 11;
const STIME_FIELD: usize = 12;
const CUTIME_FIELD: usize = 13;
const CSTIME_FIELD: usize = 14;
const RSS_FIELD: usize = 21;
const BLKIO_TICKS_FIELD: usize = 39;

/// Disk stat field holding accumulated time-in-queue, 1-based.
pub const DISK_QUEUE_TIME_FIELD: usize = 11;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// The handful of `/proc/[pid]/stat` fields the monitor needs, in kernel units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStat {
    pub pid: u32,
    pub name: String,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub rss_pages: i64,
    pub blkio_ticks: u64,
}

impl TaskStat {
    /// Own plus waited-for children ticks. Negative child counters count as zero.
    pub fn total_cpu_ticks(&self) -> u64 {
        self.utime
            .saturating_add(self.stime)
            .saturating_add(self.cutime.max(0) as u64)
            .saturating_add(self.cstime.max(0) as u64)
    }

    pub fn resident_pages(&self) -> u64 {
        self.rss_pages.max(0) as u64
    }
}

/// Parses `/proc/[pid]/stat` content read for `expected_pid`.
///
/// The name may contain spaces and parentheses, so it is delimited by the
/// first `(` and the last `)`. The record is rejected when the embedded pid
/// disagrees with `expected_pid`, when either pid is zero, when the tail after
/// the name is implausibly short, or when any of the six needed values fails
/// to parse.
pub fn parse_task_stat(content: &str, expected_pid: u32) -> Result<TaskStat, ParseError> {
    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    if pid != expected_pid {
        return Err(ParseError::new(format!(
            "pid mismatch: record says {}, expected {}",
            pid, expected_pid
        )));
    }
    if pid == 0 {
        return Err(ParseError::new("zero pid"));
    }

    let remaining = content[close_paren + 1..].trim_start();
    if remaining.len() < MIN_STAT_TAIL_LEN {
        return Err(ParseError::new(format!(
            "stat line too short: {} chars after name",
            remaining.len()
        )));
    }

    let name: String = content[open_paren + 1..close_paren]
        .chars()
        .take(TASK_NAME_LEN)
        .collect();

    let fields: Vec<&str> = remaining.split_whitespace().collect();
    let mut parsed = 0usize;

    let mut field_u64 = |idx: usize, what: &str| -> Result<u64, ParseError> {
        let value = fields
            .get(idx)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                ParseError::new(format!("expected 6 values, parsed {} (bad {})", parsed, what))
            })?;
        parsed += 1;
        Ok(value)
    };
    let utime = field_u64(UTIME_FIELD, "utime")?;
    let stime = field_u64(STIME_FIELD, "stime")?;

    let mut field_i64 = |idx: usize, what: &str| -> Result<i64, ParseError> {
        let value = fields
            .get(idx)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                ParseError::new(format!("expected 6 values, parsed {} (bad {})", parsed, what))
            })?;
        parsed += 1;
        Ok(value)
    };
    let cutime = field_i64(CUTIME_FIELD, "cutime")?;
    let cstime = field_i64(CSTIME_FIELD, "cstime")?;
    let rss_pages = field_i64(RSS_FIELD, "rss")?;

    let blkio_ticks = fields
        .get(BLKIO_TICKS_FIELD)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            ParseError::new(format!(
                "expected 6 values, parsed {} (bad delayacct_blkio_ticks)",
                parsed
            ))
        })?;

    Ok(TaskStat {
        pid,
        name,
        utime,
        stime,
        cutime,
        cstime,
        rss_pages,
        blkio_ticks,
    })
}

/// Cumulative system-wide CPU ticks from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub active: u64,
    pub total: u64,
}

/// Parses the first line of `/proc/stat`, which must be the aggregate `cpu ` line.
///
/// The fourth number is idle time; every number contributes to the total.
pub fn parse_cpu_ticks(content: &str) -> Result<CpuTicks, ParseError> {
    if !content.starts_with("cpu ") {
        return Err(ParseError::new("first line not cpu"));
    }
    let line = content
        .split_once('\n')
        .map(|(line, _)| line)
        .ok_or_else(|| ParseError::new("first line too long"))?;

    let mut total: u64 = 0;
    let mut idle: u64 = 0;
    let mut count = 0usize;
    for value in line
        .split_whitespace()
        .filter(|tok| tok.starts_with(|c: char| c.is_ascii_digit()))
    {
        let ticks: u64 = value
            .parse()
            .map_err(|_| ParseError::new(format!("invalid tick count '{}'", value)))?;
        count += 1;
        if count == 4 {
            idle = ticks;
        }
        total = total.saturating_add(ticks);
    }

    if count < 4 {
        return Err(ParseError::new(format!(
            "first line too few fields: {}",
            count
        )));
    }

    Ok(CpuTicks {
        active: total - idle,
        total,
    })
}

/// The three leading `/proc/meminfo` values, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
}

/// Value of one `/proc/meminfo` label in kB, or `None` when the label is absent.
pub fn meminfo_value(content: &str, label: &str) -> Result<Option<u64>, ParseError> {
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != label {
            continue;
        }
        let value = rest.split_whitespace().next().unwrap_or("");
        return value
            .parse()
            .map(Some)
            .map_err(|_| ParseError::new(format!("invalid {} value '{}'", label, value)));
    }
    Ok(None)
}

/// Parses `MemTotal`, `MemFree` and `MemAvailable` from `/proc/meminfo`.
///
/// All three labels must be present.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let field = |label: &str| -> Result<u64, ParseError> {
        meminfo_value(content, label)?
            .ok_or_else(|| ParseError::new(format!("missing {}", label)))
    };

    Ok(MemInfo {
        mem_total: field("MemTotal")?,
        mem_free: field("MemFree")?,
        mem_available: field("MemAvailable")?,
    })
}

/// Parses the 1-minute load average, the first field of `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> Result<f64, ParseError> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty loadavg"))?;
    first
        .parse()
        .map_err(|_| ParseError::new(format!("invalid load1 '{}'", first)))
}

/// Finds the mount point of the cpuset hierarchy in `/proc/mounts` content.
///
/// A line qualifies when `cpuset` appears as the filesystem type or among the
/// comma-separated mount options. Returns the first match.
pub fn find_cpuset_mount(mounts: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _device = fields.next()?;
        let mount_point = fields.next()?;
        fields
            .flat_map(|f| f.split(','))
            .any(|tok| tok == "cpuset")
            .then(|| PathBuf::from(mount_point))
    })
}

/// Reports whether a `*memory_pressure_enabled` flag file says enabled.
pub fn flag_enabled(content: &str) -> bool {
    content.starts_with('1')
}

/// Parses a cpuset memory pressure value. Fractional input is truncated.
pub fn parse_memory_pressure(content: &str) -> Result<u64, ParseError> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty memory pressure"))?;
    first
        .parse::<u64>()
        .or_else(|_| first.parse::<f64>().map(|v| v.max(0.0) as u64))
        .map_err(|_| ParseError::new(format!("invalid memory pressure '{}'", first)))
}

/// Extracts the accumulated time-in-queue counter from a block device `stat` file.
///
/// The kernel keeps this as a 32-bit counter that wraps; wider values are
/// truncated to match.
pub fn parse_disk_queue_time(content: &str) -> Result<u32, ParseError> {
    let field = content
        .split_whitespace()
        .nth(DISK_QUEUE_TIME_FIELD - 1)
        .ok_or_else(|| ParseError::new(format!("no field {}", DISK_QUEUE_TIME_FIELD)))?;
    field
        .parse::<u64>()
        .map(|v| v as u32)
        .map_err(|_| ParseError::new(format!("invalid time_in_queue '{}'", field)))
}
