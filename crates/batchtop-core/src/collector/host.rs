//! Host constants resolved once at startup and passed to every reader.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::procfs::parser::meminfo_value;
use crate::collector::traits::FileSystem;
use crate::error::CollectError;

/// Unit-conversion constants for the running host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostContext {
    /// Clock ticks per second used in per-task stat records (`USER_HZ`).
    pub ticks_per_sec: u64,
    /// Kernel page size in kB.
    pub page_kb: u64,
    /// Total RAM in kB, from `MemTotal`.
    pub ram_kb: u64,
    /// Number of CPUs rates are normalized by.
    pub cpu_count: u32,
}

impl HostContext {
    /// Builds a context from known values. Zero divisors are treated as one.
    pub fn new(ticks_per_sec: u64, page_kb: u64, ram_kb: u64, cpu_count: u32) -> Self {
        Self {
            ticks_per_sec: ticks_per_sec.max(1),
            page_kb,
            ram_kb: ram_kb.max(1),
            cpu_count: cpu_count.max(1),
        }
    }

    /// Resolves every constant from the host.
    ///
    /// Clock ticks and page size come from `sysconf`, RAM from `MemTotal` under
    /// `proc_path`, and the CPU count from `cpuN` entries under
    /// `<sys_path>/devices/system/cpu`.
    pub fn detect<F: FileSystem>(
        fs: &F,
        proc_path: &Path,
        sys_path: &Path,
    ) -> Result<Self, CollectError> {
        let ticks_per_sec = sysconf(libc::_SC_CLK_TCK, "clock ticks per second")?;
        let page_bytes = sysconf(libc::_SC_PAGESIZE, "page size")?;
        let page_kb = page_bytes / 1024;
        if page_kb == 0 {
            return Err(CollectError::HostConstant {
                name: "page size",
                reason: format!("{} bytes is below 1 kB", page_bytes),
            });
        }
        let ram_kb = read_ram_kb(fs, proc_path)?;
        let cpu_count = count_cpus(fs, sys_path);

        let host = Self::new(ticks_per_sec, page_kb, ram_kb, cpu_count);
        debug!(?host, "host constants resolved");
        Ok(host)
    }

    /// Converts clock ticks to milliseconds, multiplying before dividing.
    pub fn ticks_to_ms(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(1000) / self.ticks_per_sec
    }

    /// Converts resident pages to thousandths of total RAM.
    pub fn pages_to_permille(&self, pages: u64) -> u64 {
        pages.saturating_mul(self.page_kb).saturating_mul(1000) / self.ram_kb
    }
}

fn sysconf(name: libc::c_int, what: &'static str) -> Result<u64, CollectError> {
    // SAFETY: sysconf takes a plain integer and touches no caller memory.
    let value = unsafe { libc::sysconf(name) };
    if value <= 0 {
        return Err(CollectError::HostConstant {
            name: what,
            reason: format!("sysconf returned {}", value),
        });
    }
    Ok(value as u64)
}

/// Reads `MemTotal` in kB. A missing or zero value is fatal.
pub fn read_ram_kb<F: FileSystem>(fs: &F, proc_path: &Path) -> Result<u64, CollectError> {
    let path = proc_path.join("meminfo");
    let content = fs
        .read_to_string(&path)
        .map_err(|e| CollectError::io(&path, e))?;
    match meminfo_value(&content, "MemTotal") {
        Ok(Some(total)) if total > 0 => Ok(total),
        Ok(_) => Err(CollectError::MemTotalMissing { path }),
        Err(e) => Err(CollectError::malformed(&path, e.message)),
    }
}

/// Counts `cpuN` directories under `<sys_path>/devices/system/cpu`.
///
/// Falls back to 1 (no scaling) when the directory is unreadable or empty.
pub fn count_cpus<F: FileSystem>(fs: &F, sys_path: &Path) -> u32 {
    let dir = sys_path.join("devices/system/cpu");
    let entries = match fs.read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("unable to scan {}: {}, not scaling by CPU count", dir.display(), e);
            return 1;
        }
    };

    let count = entries
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .filter(|name| {
            name.strip_prefix("cpu")
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        })
        .count() as u32;

    if count == 0 {
        warn!("found no cpu# in {}, not scaling by CPU count", dir.display());
        return 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MOCK_RAM_KB, MockFs};

    #[test]
    fn test_unit_conversions() {
        let host = HostContext::new(100, 4, 16_000_000, 4);
        assert_eq!(host.ticks_to_ms(250), 2_500);
        // 40_000 pages * 4 kB = 160_000 kB = 1% of RAM.
        assert_eq!(host.pages_to_permille(40_000), 10);
        assert_eq!(host.pages_to_permille(0), 0);
    }

    #[test]
    fn test_zero_cpus_treated_as_one() {
        assert_eq!(HostContext::new(100, 4, 1024, 0).cpu_count, 1);
    }

    #[test]
    fn test_read_ram_kb() {
        let fs = MockFs::typical_system();
        assert_eq!(read_ram_kb(&fs, Path::new("/proc")).unwrap(), MOCK_RAM_KB);

        fs.add_file("/proc/meminfo", "MemFree: 10 kB\n");
        let err = read_ram_kb(&fs, Path::new("/proc")).unwrap_err();
        assert!(matches!(err, CollectError::MemTotalMissing { .. }));
    }

    #[test]
    fn test_count_cpus() {
        let fs = MockFs::typical_system();
        assert_eq!(count_cpus(&fs, Path::new("/sys")), 4);

        let empty = MockFs::new();
        assert_eq!(count_cpus(&empty, Path::new("/sys")), 1);

        empty.add_dir("/sys/devices/system/cpu/cpufreq");
        assert_eq!(count_cpus(&empty, Path::new("/sys")), 1);
    }

    #[test]
    fn test_detect_on_mock_host() {
        let fs = MockFs::typical_system();
        let host = HostContext::detect(&fs, Path::new("/proc"), Path::new("/sys")).unwrap();
        assert_eq!(host.ram_kb, MOCK_RAM_KB);
        assert_eq!(host.cpu_count, 4);
        assert!(host.ticks_per_sec > 0);
        assert!(host.page_kb > 0);
    }
}
