//! What the monitor emits, and the sinks that render it.

use std::io::{self, Write};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::collector::disk::DiskRate;
use crate::collector::procfs::system::LoadSample;
use crate::error::Result;
use crate::fmt::{NO_COMMON_TASKS_LINE, NO_HOGS_LINE, format_header, format_hog_row, hog_table_header};
use crate::rank::Verdict;

/// Count of tasks whose name matched a configured substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCount {
    pub label: String,
    pub count: usize,
}

/// One selected task, ready to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HogRow {
    pub id: u32,
    pub name: String,
    pub cpu_rate: u64,
    pub mem_level: u64,
    pub io_rate: u64,
    pub cmdline: String,
}

/// Everything shown for one Inspect cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusyReport {
    #[serde(skip)]
    pub time: DateTime<Local>,
    pub epoch_secs: i64,
    pub load: LoadSample,
    pub counters: Vec<NameCount>,
    pub disks: Vec<DiskRate>,
    pub verdict: Verdict,
    pub hogs: Vec<HogRow>,
}

/// Output sink for the monitor loop.
pub trait Reporter {
    /// Entering Watch.
    fn watch_started(&mut self, epoch_secs: i64) -> io::Result<()>;

    /// Each Watch tick.
    fn watch_tick(&mut self, epoch_secs: i64) -> io::Result<()>;

    /// Leaving Watch for Inspect.
    fn busy_begins(&mut self) -> io::Result<()>;

    fn report(&mut self, report: &BusyReport) -> Result<()>;
}

/// Human-readable output: compact time markers while idle, a header and a
/// hog table while busy.
pub struct TextReporter<W: Write> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn watch_started(&mut self, epoch_secs: i64) -> io::Result<()> {
        write!(self.out, "{}.", epoch_secs)
    }

    fn watch_tick(&mut self, epoch_secs: i64) -> io::Result<()> {
        write!(self.out, "{}.", epoch_secs % 10_000)?;
        self.out.flush()
    }

    fn busy_begins(&mut self) -> io::Result<()> {
        writeln!(self.out)
    }

    fn report(&mut self, report: &BusyReport) -> Result<()> {
        write!(self.out, "\n{}", format_header(report))?;
        match report.verdict {
            Verdict::Hogs => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", hog_table_header())?;
                for row in &report.hogs {
                    writeln!(self.out, "{}", format_hog_row(row))?;
                }
            }
            Verdict::NoHogs => writeln!(self.out, "{}", NO_HOGS_LINE)?,
            Verdict::NoJoinedTasks => writeln!(self.out, "{}", NO_COMMON_TASKS_LINE)?,
        }
        self.out.flush()?;
        Ok(())
    }
}

/// One JSON object per busy report, newline-delimited. Idle ticks are silent.
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn watch_started(&mut self, _epoch_secs: i64) -> io::Result<()> {
        Ok(())
    }

    fn watch_tick(&mut self, _epoch_secs: i64) -> io::Result<()> {
        Ok(())
    }

    fn busy_begins(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn report(&mut self, report: &BusyReport) -> Result<()> {
        serde_json::to_writer(&mut self.out, report)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Either reporter, picked at startup.
pub enum AnyReporter<W: Write> {
    Text(TextReporter<W>),
    Json(JsonReporter<W>),
}

impl<W: Write> AnyReporter<W> {
    pub fn new(out: W, json: bool) -> Self {
        if json {
            AnyReporter::Json(JsonReporter::new(out))
        } else {
            AnyReporter::Text(TextReporter::new(out))
        }
    }
}

impl<W: Write> Reporter for AnyReporter<W> {
    fn watch_started(&mut self, epoch_secs: i64) -> io::Result<()> {
        match self {
            AnyReporter::Text(r) => r.watch_started(epoch_secs),
            AnyReporter::Json(r) => r.watch_started(epoch_secs),
        }
    }

    fn watch_tick(&mut self, epoch_secs: i64) -> io::Result<()> {
        match self {
            AnyReporter::Text(r) => r.watch_tick(epoch_secs),
            AnyReporter::Json(r) => r.watch_tick(epoch_secs),
        }
    }

    fn busy_begins(&mut self) -> io::Result<()> {
        match self {
            AnyReporter::Text(r) => r.busy_begins(),
            AnyReporter::Json(r) => r.busy_begins(),
        }
    }

    fn report(&mut self, report: &BusyReport) -> Result<()> {
        match self {
            AnyReporter::Text(r) => r.report(report),
            AnyReporter::Json(r) => r.report(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(verdict: Verdict, hogs: Vec<HogRow>) -> BusyReport {
        let time = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        BusyReport {
            time,
            epoch_secs: 1_700_000_000,
            load: LoadSample {
                loadavg: 7.5,
                cpu_load: 0.91,
                mem_load: 0.42,
                mem_pressure: 3,
            },
            counters: vec![NameCount {
                label: "PHP".into(),
                count: 4,
            }],
            disks: vec![DiskRate {
                name: "sda".into(),
                rate: 250,
            }],
            verdict,
            hogs,
        }
    }

    fn hog() -> HogRow {
        HogRow {
            id: 1001,
            name: "php-fpm: pool".into(),
            cpu_rate: 700,
            mem_level: 19,
            io_rate: 0,
            cmdline: "php-fpm: pool www".into(),
        }
    }

    #[test]
    fn test_text_watch_markers() {
        let mut reporter = TextReporter::new(Vec::new());
        reporter.watch_started(1_700_012_345).unwrap();
        reporter.watch_tick(1_700_012_345).unwrap();
        reporter.watch_tick(1_700_012_355).unwrap();
        reporter.busy_begins().unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(out, "1700012345.2345.2355.\n");
    }

    #[test]
    fn test_text_report_with_hogs() {
        let mut reporter = TextReporter::new(Vec::new());
        reporter.report(&report(Verdict::Hogs, vec![hog()])).unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "");
        assert!(lines[1].ends_with(
            " - loadavg  7.50; CPU load  91%; Mem load 42%; Mem pres    3; cnt PHP  4; diskusage sda:250"
        ));
        assert!(lines[2].contains("pid") && lines[2].contains("cmdline"));
        assert!(lines[3].contains("php-fpm: pool www"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_text_report_without_hogs() {
        let mut reporter = TextReporter::new(Vec::new());
        reporter.report(&report(Verdict::NoHogs, Vec::new())).unwrap();
        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(out.ends_with("; diskusage sda:250 - no individual tasks are hogs.\n"));
    }

    #[test]
    fn test_json_report() {
        let mut reporter = AnyReporter::new(Vec::new(), true);
        reporter.watch_started(1).unwrap();
        reporter.watch_tick(1).unwrap();
        reporter.report(&report(Verdict::Hogs, vec![hog()])).unwrap();

        let AnyReporter::Json(json) = reporter else {
            panic!("expected json reporter");
        };
        let out = String::from_utf8(json.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["epoch_secs"], 1_700_000_000);
        assert_eq!(value["verdict"], "hogs");
        assert_eq!(value["hogs"][0]["id"], 1001);
        assert_eq!(value["disks"][0]["rate"], 250);
        assert_eq!(value["load"]["mem_pressure"], 3);
    }
}
