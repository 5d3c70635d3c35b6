//! The adaptive two-rate polling loop.
//!
//! ```text
//!             idle: marker, sleep coarse
//!             ┌────┐
//!             │    ▼
//!          ┌──┴───────┐  busy: baseline snapshot,   ┌───────────┐
//! start ──►│  Watch   ├────────────────────────────►│  Inspect  │◄─┐ busy: snapshot, rank,
//!          └──────────┘      sleep settle           └─────┬─────┘  │ report, sleep fine
//!                ▲                                        │        │
//!                └──────────── idle: drop prior ──────────┴────────┘
//! ```
//!
//! Watch reads only the four system-wide scalars. Full task enumeration and
//! ranking happen only while the host stays busy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info, trace};

use crate::collector::disk::DiskTracker;
use crate::collector::host::HostContext;
use crate::collector::procfs::system::{LoadSample, SystemProbe};
use crate::collector::procfs::task::TaskCollector;
use crate::collector::traits::FileSystem;
use crate::config::{BusyThresholds, MonitorConfig};
use crate::error::Result;
use crate::model::SystemSnapshot;
use crate::rank::{RankParams, rank};
use crate::report::{BusyReport, HogRow, NameCount, Reporter};

/// Granularity of interruptible sleeps in [`Monitor::run`].
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// True when any reading exceeds its threshold.
///
/// Raising a threshold can only turn a true result false, never the reverse.
pub fn is_loaded(sample: &LoadSample, thresholds: &BusyThresholds) -> bool {
    sample.loadavg > thresholds.loadavg
        || sample.cpu_load * 100.0 > thresholds.cpu_pct
        || sample.mem_load * 100.0 > thresholds.mem_pct
        || sample.mem_pressure > thresholds.mem_pressure
}

/// Time source: monotonic for rates, wall clock for markers and headers.
pub trait Clock {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    base_wall: DateTime<Local>,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new(base_wall: DateTime<Local>) -> Self {
        Self {
            base: Instant::now(),
            base_wall,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn wall(&self) -> DateTime<Local> {
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base_wall + offset
    }
}

/// Which state the loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Watch,
    Inspect,
}

enum State {
    Watch,
    Inspect {
        prior: SystemSnapshot,
        prior_at: Instant,
        /// Readings that put us here; re-read on later ticks.
        load: Option<LoadSample>,
    },
}

/// Ties the collectors, ranking engine and reporter into the polling loop.
pub struct Monitor<F: FileSystem, C: Clock, R: Reporter> {
    config: MonitorConfig,
    host: HostContext,
    probe: SystemProbe<F>,
    tasks: TaskCollector<F>,
    disks: DiskTracker<F>,
    clock: C,
    reporter: R,
    state: State,
}

impl<F, C, R> Monitor<F, C, R>
where
    F: FileSystem + Clone,
    C: Clock,
    R: Reporter,
{
    /// Opens the system-wide sources and registers the configured disks.
    pub fn new(
        fs: F,
        host: HostContext,
        config: MonitorConfig,
        clock: C,
        reporter: R,
    ) -> Result<Self> {
        let probe = SystemProbe::open(fs.clone(), &config.proc_path, config.reads_pressure())?;
        let tasks = TaskCollector::new(fs.clone(), &config.proc_path, host);
        let disks = DiskTracker::new(fs).with_disks(&config.disks);

        Ok(Self {
            config,
            host,
            probe,
            tasks,
            disks,
            clock,
            reporter,
            state: State::Watch,
        })
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Watch => Phase::Watch,
            State::Inspect { .. } => Phase::Inspect,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    fn wall_secs(&self) -> i64 {
        self.clock.wall().timestamp()
    }

    fn enter_watch(&mut self) -> Result<Duration> {
        self.state = State::Watch;
        let now = self.wall_secs();
        self.reporter.watch_started(now)?;
        self.reporter.watch_tick(now)?;
        Ok(self.config.coarse_interval)
    }

    /// Primes the CPU counters and every disk, resolves the memory pressure
    /// source, then enters Watch.
    ///
    /// Returns how long to wait before the first [`Monitor::tick`].
    pub fn start(&mut self) -> Result<Duration> {
        self.probe.read_cpu_load()?;
        self.probe.read_mem_pressure()?;
        info!(
            memory_pressure = ?self.probe.pressure_available(),
            "system sources open"
        );

        let now = self.wall_secs();
        self.disks.prime(now.max(0) as u64)?;
        if !self.disks.is_empty() {
            let names: Vec<&str> = self
                .disks
                .entries()
                .iter()
                .map(|e| e.display_name.as_str())
                .collect();
            info!(disks = ?names, "disk queue time primed");
        }

        self.enter_watch()
    }

    /// Whether memory pressure feeds the busy test. `None` before [`Monitor::start`].
    pub fn pressure_available(&self) -> Option<bool> {
        self.probe.pressure_available()
    }

    /// Runs one step of the state machine and returns the wait before the next.
    pub fn tick(&mut self) -> Result<Duration> {
        match std::mem::replace(&mut self.state, State::Watch) {
            State::Watch => self.tick_watch(),
            State::Inspect {
                prior,
                prior_at,
                load,
            } => self.tick_inspect(prior, prior_at, load),
        }
    }

    fn tick_watch(&mut self) -> Result<Duration> {
        let load = self.probe.sample()?;
        trace!(?load, "watch sample");

        if !is_loaded(&load, &self.config.busy) {
            self.reporter.watch_tick(self.wall_secs())?;
            return Ok(self.config.coarse_interval);
        }

        self.reporter.busy_begins()?;
        debug!(?load, "host busy, entering inspect");

        let prior = self.tasks.build_snapshot()?;
        let prior_at = self.clock.now();
        self.disks.sample(self.wall_secs().max(0) as u64)?;

        self.state = State::Inspect {
            prior,
            prior_at,
            load: Some(load),
        };
        Ok(self.config.settle_interval())
    }

    fn tick_inspect(
        &mut self,
        prior: SystemSnapshot,
        prior_at: Instant,
        load: Option<LoadSample>,
    ) -> Result<Duration> {
        let load = match load {
            Some(load) => load,
            None => {
                let load = self.probe.sample()?;
                if !is_loaded(&load, &self.config.busy) {
                    debug!(?load, "host idle again, back to watch");
                    return self.enter_watch();
                }
                load
            }
        };

        let started = Instant::now();
        let latest = self.tasks.build_snapshot()?;
        let latest_at = self.clock.now();
        let disks = self.disks.sample(self.wall_secs().max(0) as u64)?;

        let params = RankParams {
            elapsed: latest_at.saturating_duration_since(prior_at),
            dimensions: self.config.dimensions,
            floors: self.config.floors,
            max_results: self.config.max_results,
            cpu_count: self.host.cpu_count,
        };
        let ranking = rank(&prior, &latest, &params)?;

        let hogs = ranking
            .selected()
            .map(|t| {
                let sample = &latest.samples()[t.latest_index];
                HogRow {
                    id: sample.id,
                    name: sample.name.clone(),
                    cpu_rate: t.cpu_rate,
                    mem_level: t.mem_level,
                    io_rate: t.io_rate,
                    cmdline: self.tasks.read_cmdline(sample.id, self.config.cmdline_len),
                }
            })
            .collect();
        let counters = self
            .config
            .counters
            .iter()
            .map(|c| NameCount {
                label: c.label.clone(),
                count: latest.count_matching(&c.needle),
            })
            .collect();

        let time = self.clock.wall();
        let report = BusyReport {
            time,
            epoch_secs: time.timestamp(),
            load,
            counters,
            disks,
            verdict: ranking.verdict(),
            hogs,
        };
        self.reporter.report(&report)?;

        debug!(
            prior = prior.count(),
            latest = latest.count(),
            joined = ranking.joined.len(),
            shown = report.hogs.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "inspect cycle"
        );

        self.state = State::Inspect {
            prior: latest,
            prior_at: latest_at,
            load: None,
        };
        Ok(self.config.fine_interval)
    }

    /// Polls until `running` clears. Sleeps are sliced so a shutdown request
    /// is noticed within [`SLEEP_SLICE`]; a cycle in progress always finishes.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        let mut wait = self.start()?;
        info!(
            coarse_s = self.config.coarse_interval.as_secs_f64(),
            fine_s = self.config.fine_interval.as_secs_f64(),
            "watching"
        );

        loop {
            let mut remaining = wait;
            while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
                let step = remaining.min(SLEEP_SLICE);
                std::thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }
            wait = self.tick()?;
        }
    }
}
