//! System-wide scalars polled on every scheduler tick.
//!
//! Each source is opened once and re-read from offset 0. CPU load needs the
//! previous tick counters, and memory pressure needs a one-time search for the
//! cpuset mount; both live on the probe rather than in globals.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collector::procfs::parser::{
    CpuTicks, find_cpuset_mount, flag_enabled, parse_cpu_ticks, parse_loadavg, parse_meminfo,
    parse_memory_pressure,
};
use crate::collector::traits::{FileSystem, Source};
use crate::error::CollectError;

const LOADAVG_READ_LIMIT: usize = 32;
const STAT_READ_LIMIT: usize = 256;
const MEMINFO_READ_LIMIT: usize = 512;
const PRESSURE_READ_LIMIT: usize = 256;

/// Minimum bytes for a usable first line of `/proc/stat`.
const STAT_MIN_READ: usize = 5;
/// Minimum bytes for the three leading meminfo lines.
const MEMINFO_MIN_READ: usize = 40;

/// Enable-flag and value file names, in probe order.
const PRESSURE_FILES: [(&str, &str); 2] = [
    ("memory_pressure_enabled", "memory_pressure"),
    ("cpuset.memory_pressure_enabled", "cpuset.memory_pressure"),
];

/// The four readings the busy test is evaluated on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadSample {
    /// 1-minute load average.
    pub loadavg: f64,
    /// Fraction of CPU ticks spent active since the previous reading, 0..=1.
    pub cpu_load: f64,
    /// Fraction of RAM not available for reuse, 0..=1.
    pub mem_load: f64,
    /// Cpuset memory pressure, 0 when unavailable.
    pub mem_pressure: u64,
}

/// Outcome of the one-time memory pressure lookup.
enum PressureSource {
    /// Reader turned off by configuration; never resolved.
    Skipped,
    Unresolved,
    Enabled(Box<dyn Source>),
    /// No cpuset mount or no enabled flag. Permanent for the process.
    Disabled,
}

/// Reads load average, CPU load, memory load and memory pressure.
pub struct SystemProbe<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    loadavg: Box<dyn Source>,
    stat: Box<dyn Source>,
    meminfo: Box<dyn Source>,
    pressure: PressureSource,
    prev_cpu: CpuTicks,
    buf: Vec<u8>,
}

fn open<F: FileSystem>(fs: &F, path: PathBuf) -> Result<Box<dyn Source>, CollectError> {
    fs.open_source(&path).map_err(|e| CollectError::io(&path, e))
}

fn read_text<'a>(
    source: &mut dyn Source,
    buf: &'a mut Vec<u8>,
    limit: usize,
    min_len: usize,
) -> Result<&'a str, CollectError> {
    let n = source
        .read_head(buf, limit)
        .map_err(|e| CollectError::io(source.path(), e))?;
    if n < min_len {
        return Err(CollectError::malformed(
            source.path(),
            format!("short read: {} bytes", n),
        ));
    }
    std::str::from_utf8(buf).map_err(|_| CollectError::malformed(source.path(), "not valid UTF-8"))
}

impl<F: FileSystem> SystemProbe<F> {
    /// Opens the system-wide sources under `proc_path`.
    ///
    /// With `read_pressure` false the memory pressure reader is never
    /// resolved and always reads 0.
    pub fn open(
        fs: F,
        proc_path: impl Into<PathBuf>,
        read_pressure: bool,
    ) -> Result<Self, CollectError> {
        let proc_path = proc_path.into();
        let loadavg = open(&fs, proc_path.join("loadavg"))?;
        let stat = open(&fs, proc_path.join("stat"))?;
        let meminfo = open(&fs, proc_path.join("meminfo"))?;

        Ok(Self {
            fs,
            proc_path,
            loadavg,
            stat,
            meminfo,
            pressure: if read_pressure {
                PressureSource::Unresolved
            } else {
                PressureSource::Skipped
            },
            prev_cpu: CpuTicks::default(),
            buf: Vec::with_capacity(MEMINFO_READ_LIMIT),
        })
    }

    /// Reads the 1-minute load average.
    pub fn read_loadavg(&mut self) -> Result<f64, CollectError> {
        let text = read_text(self.loadavg.as_mut(), &mut self.buf, LOADAVG_READ_LIMIT, 1)?;
        parse_loadavg(text).map_err(|e| CollectError::malformed(self.loadavg.path(), e.message))
    }

    /// Active/total CPU tick ratio since the previous call.
    ///
    /// The first call measures since boot. If the counters shrink, the reading
    /// is 0 and the new counters become the baseline.
    pub fn read_cpu_load(&mut self) -> Result<f64, CollectError> {
        let text = read_text(self.stat.as_mut(), &mut self.buf, STAT_READ_LIMIT, STAT_MIN_READ)?;
        let ticks =
            parse_cpu_ticks(text).map_err(|e| CollectError::malformed(self.stat.path(), e.message))?;
        let prev = std::mem::replace(&mut self.prev_cpu, ticks);

        if ticks.active < prev.active || ticks.total < prev.total || ticks.total == 0 {
            warn!(
                prev_active = prev.active,
                active = ticks.active,
                prev_total = prev.total,
                total = ticks.total,
                "cpu load ticks shrank, reporting zero load"
            );
            return Ok(0.0);
        }

        let delta_active = ticks.active - prev.active;
        let delta_total = (ticks.total - prev.total).max(1);
        Ok(delta_active as f64 / delta_total as f64)
    }

    /// `(MemTotal - MemAvailable) / MemTotal`.
    pub fn read_mem_load(&mut self) -> Result<f64, CollectError> {
        let text = read_text(
            self.meminfo.as_mut(),
            &mut self.buf,
            MEMINFO_READ_LIMIT,
            MEMINFO_MIN_READ,
        )?;
        let path = self.meminfo.path();
        let info = parse_meminfo(text).map_err(|e| CollectError::malformed(path, e.message))?;

        if info.mem_total == 0 {
            return Err(CollectError::malformed(path, "zero MemTotal"));
        }
        if info.mem_available > info.mem_total {
            return Err(CollectError::malformed(
                path,
                format!(
                    "MemAvailable {} exceeds MemTotal {}",
                    info.mem_available, info.mem_total
                ),
            ));
        }
        Ok((info.mem_total - info.mem_available) as f64 / info.mem_total as f64)
    }

    /// Current cpuset memory pressure, or 0 when the source is unavailable.
    pub fn read_mem_pressure(&mut self) -> Result<u64, CollectError> {
        if matches!(self.pressure, PressureSource::Unresolved) {
            self.pressure = self.resolve_pressure()?;
        }

        let PressureSource::Enabled(source) = &mut self.pressure else {
            return Ok(0);
        };
        let text = read_text(source.as_mut(), &mut self.buf, PRESSURE_READ_LIMIT, 1)?;
        parse_memory_pressure(text).map_err(|e| CollectError::malformed(source.path(), e.message))
    }

    fn resolve_pressure(&self) -> Result<PressureSource, CollectError> {
        let mounts_path = self.proc_path.join("mounts");
        let mounts = self
            .fs
            .read_to_string(&mounts_path)
            .map_err(|e| CollectError::io(&mounts_path, e))?;

        if let Some(mount) = find_cpuset_mount(&mounts) {
            for (flag, value) in PRESSURE_FILES {
                if self.flag_set(&mount.join(flag)) {
                    let source = open(&self.fs, mount.join(value))?;
                    info!("memory pressure read from {}", source.path().display());
                    return Ok(PressureSource::Enabled(source));
                }
            }
            debug!(mount = %mount.display(), "cpuset mounted without memory pressure enabled");
        }

        info!("cpuset not mounted or memory pressure not enabled, pressure reads as 0");
        Ok(PressureSource::Disabled)
    }

    /// A `cpuset` filesystem mount uses bare file names; a cgroup v1 mount
    /// prefixes them with `cpuset.`.
    fn flag_set(&self, path: &Path) -> bool {
        self.fs.exists(path)
            && self
                .fs
                .read_to_string(path)
                .is_ok_and(|content| flag_enabled(&content))
    }

    /// Whether the pressure lookup found an enabled source. `None` until resolved.
    pub fn pressure_available(&self) -> Option<bool> {
        match self.pressure {
            PressureSource::Enabled(_) => Some(true),
            PressureSource::Disabled | PressureSource::Skipped => Some(false),
            PressureSource::Unresolved => None,
        }
    }

    /// Reads all four scalars, in the order load, CPU, memory, pressure.
    pub fn sample(&mut self) -> Result<LoadSample, CollectError> {
        Ok(LoadSample {
            loadavg: self.read_loadavg()?,
            cpu_load: self.read_cpu_load()?,
            mem_load: self.read_mem_load()?,
            mem_pressure: self.read_mem_pressure()?,
        })
    }
}
