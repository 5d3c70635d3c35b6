//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and `/sys` states for an idle
//! host, plus small setters for pushing the system-wide readings into the
//! busy range.

use super::filesystem::MockFs;

/// RAM size of the mock host, in kB.
pub const MOCK_RAM_KB: u64 = 16_384_000;

impl MockFs {
    /// Creates an idle four-CPU system with a few tasks and one monitored disk.
    ///
    /// Includes: init (PID 1), sshd (PID 812), bash (PID 1000), php-fpm (PID 1001)
    /// and httpd (PID 1002). The cpuset hierarchy is mounted at `/dev/cpuset`
    /// with memory pressure enabled and reading 0.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.set_loadavg(0.15);
        fs.set_meminfo(MOCK_RAM_KB, 12_000_000);
        fs.set_cpu_ticks(14_800, 80_000);
        fs.add_file(
            "/proc/mounts",
            "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
cgroup /dev/cpuset cgroup rw,relatime,cpuset 0 0
",
        );
        fs.add_file("/dev/cpuset/memory_pressure_enabled", "1\n");
        fs.add_file("/dev/cpuset/memory_pressure", "0\n");

        for cpu in 0..4 {
            fs.add_dir(format!("/sys/devices/system/cpu/cpu{}", cpu));
        }
        fs.add_dir("/sys/devices/system/cpu/cpufreq");
        fs.add_file("/sys/devices/system/cpu/online", "0-3\n");

        fs.set_disk_queue_time("/sys/block/sda/stat", 1000);

        fs.add_task(1, "systemd", 5_000, 3_000, 40, "/sbin/init\0splash\0");
        fs.add_task(812, "sshd", 200, 1_500, 0, "/usr/sbin/sshd\0-D\0");
        fs.add_task(1000, "bash", 1_000, 1_200, 5, "-bash\0");
        fs.add_task(1001, "php-fpm: pool", 20_000, 80_000, 300, "php-fpm: pool www\0");
        fs.add_task(1002, "httpd", 8_000, 40_000, 120, "/usr/sbin/httpd\0-DFOREGROUND\0");

        fs
    }

    /// Same as [`MockFs::typical_system`] but without any cpuset mount.
    pub fn without_cpuset() -> Self {
        let fs = Self::typical_system();
        fs.add_file(
            "/proc/mounts",
            "proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0\n",
        );
        fs.remove_dir_all("/dev/cpuset");
        fs
    }

    pub fn set_loadavg(&self, load1: f64) {
        self.add_file(
            "/proc/loadavg",
            format!("{:.2} 0.10 0.05 1/150 1234\n", load1),
        );
    }

    /// Writes `/proc/meminfo` with the given total and available kB.
    pub fn set_meminfo(&self, total_kb: u64, available_kb: u64) {
        self.add_file(
            "/proc/meminfo",
            format!(
                "MemTotal:       {} kB\nMemFree:        {} kB\nMemAvailable:   {} kB\nBuffers:          512000 kB\n",
                total_kb,
                available_kb / 2,
                available_kb
            ),
        );
    }

    /// Writes the aggregate `cpu` line so that active and idle sum as given.
    pub fn set_cpu_ticks(&self, active: u64, idle: u64) {
        let user = active / 2;
        let system = active - user;
        self.add_file(
            "/proc/stat",
            format!(
                "cpu  {} 0 {} {} 0 0 0 0 0 0\ncpu0 0 0 0 0 0 0 0 0 0 0\nbtime 1700000000\n",
                user, system, idle
            ),
        );
    }

    pub fn set_memory_pressure(&self, value: u64) {
        self.add_file("/dev/cpuset/memory_pressure", format!("{}\n", value));
    }

    /// Writes a block device `stat` file whose time-in-queue field is `queue_time`.
    pub fn set_disk_queue_time(&self, path: &str, queue_time: u32) {
        self.add_file(
            path,
            format!(
                "   12345      100   987654     5000     6789       50   456789     3000        0     4000 {:>8}\n",
                queue_time
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_typical_system_layout() {
        let fs = MockFs::typical_system();
        assert!(fs.exists(Path::new("/proc/loadavg")));
        assert!(fs.exists(Path::new("/proc/1002/cmdline")));
        assert!(fs.exists(Path::new("/dev/cpuset/memory_pressure")));
        assert!(fs.exists(Path::new("/sys/block/sda/stat")));
    }

    #[test]
    fn test_without_cpuset() {
        let fs = MockFs::without_cpuset();
        assert!(!fs.exists(Path::new("/dev/cpuset/memory_pressure")));
        let mounts = fs.read_to_string(Path::new("/proc/mounts")).unwrap();
        assert!(!mounts.contains("cpuset"));
    }
}
