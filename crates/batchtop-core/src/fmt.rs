//! Text formatting for busy reports.
//!
//! All pure string builders; `report::TextReporter` decides where they go.

use crate::collector::disk::DiskRate;
use crate::report::{BusyReport, HogRow, NameCount};

/// Appended to the header when tasks were joined but none met a floor.
pub const NO_HOGS_LINE: &str = " - no individual tasks are hogs.";

/// Appended to the header when no task appeared in both snapshots.
pub const NO_COMMON_TASKS_LINE: &str = " - no tasks seen in both samples.";

/// `; cnt <label> NN` per counter.
pub fn format_counters(counters: &[NameCount]) -> String {
    counters
        .iter()
        .map(|c| format!("; cnt {} {:2}", c.label, c.count))
        .collect()
}

/// `; diskusage name:rate ...`, or nothing when no disks are monitored.
pub fn format_disk_usage(disks: &[DiskRate]) -> String {
    if disks.is_empty() {
        return String::new();
    }
    let mut out = String::from("; diskusage");
    for disk in disks {
        out.push_str(&format!(" {}:{}", disk.name, disk.rate));
    }
    out
}

/// The header line, without a trailing newline.
pub fn format_header(report: &BusyReport) -> String {
    format!(
        "{} - loadavg {:5.2}; CPU load {:3.0}%; Mem load {:2.0}%; Mem pres {:4}{}{}",
        report.time.format("%c"),
        report.load.loadavg,
        report.load.cpu_load * 100.0,
        report.load.mem_load * 100.0,
        report.load.mem_pressure,
        format_counters(&report.counters),
        format_disk_usage(&report.disks),
    )
}

pub fn hog_table_header() -> String {
    format!(
        "    {:>8}  {:>16}  {:>10}  {:>10}  {:>10}  {}",
        "pid", "cmd", "mcpus", "mrams", "diskwait", "cmdline"
    )
}

pub fn format_hog_row(row: &HogRow) -> String {
    format!(
        "    {:>8}  {:>16}  {:>10}  {:>10}  {:>10}  {}",
        row.id, row.name, row.cpu_rate, row.mem_level, row.io_rate, row.cmdline
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_disk_usage() {
        assert_eq!(format_disk_usage(&[]), "");
        let disks = vec![
            DiskRate {
                name: "sda".into(),
                rate: 250,
            },
            DiskRate {
                name: "nvme".into(),
                rate: 0,
            },
        ];
        assert_eq!(format_disk_usage(&disks), "; diskusage sda:250 nvme:0");
    }

    #[test]
    fn test_format_counters() {
        let counters = vec![
            NameCount {
                label: "PHP".into(),
                count: 3,
            },
            NameCount {
                label: "httpd".into(),
                count: 12,
            },
        ];
        assert_eq!(format_counters(&counters), "; cnt PHP  3; cnt httpd 12");
    }

    #[test]
    fn test_format_hog_row_aligns_with_header() {
        let row = HogRow {
            id: 4242,
            name: "stress".into(),
            cpu_rate: 1000,
            mem_level: 5,
            io_rate: 12,
            cmdline: "stress --cpu 1".into(),
        };
        let line = format_hog_row(&row);
        let header = hog_table_header();

        assert_eq!(
            line,
            "        4242            stress        1000           5          12  stress --cpu 1"
        );
        assert_eq!(header.find("cmdline"), line.find("stress --cpu"));
    }
}
