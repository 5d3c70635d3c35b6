//! batchtop - adaptive resource-hog monitor.
//!
//! Polls a few system-wide load figures at a slow rate. When the host looks
//! busy it switches to full task scans at a faster rate and prints the tasks
//! using the most CPU, memory or block I/O wait.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use batchtop_core::collector::{HostContext, RealFs};
use batchtop_core::config::{
    BusyThresholds, DiskSpec, Dimensions, HogFloors, MonitorConfig, NameCounter,
};
use batchtop_core::report::AnyReporter;
use batchtop_core::{Monitor, SystemClock};

/// Adaptive resource-hog monitor.
#[derive(Parser)]
#[command(name = "batchtop", about = "Reports resource-hogging tasks while the host is busy", version)]
struct Args {
    /// Report CPU hogs (default when none of -C, -M, -B is given).
    #[arg(short = 'C')]
    cpu: bool,

    /// Report memory hogs.
    #[arg(short = 'M')]
    memory: bool,

    /// Report tasks waiting on block I/O.
    #[arg(short = 'B')]
    block_io: bool,

    /// Count tasks whose name contains "php".
    #[arg(short = 'P')]
    php: bool,

    /// Count tasks whose name contains "httpd".
    #[arg(short = 'H')]
    httpd: bool,

    /// Count tasks whose name contains SUBSTR. Repeatable.
    #[arg(long = "count", value_name = "SUBSTR")]
    counts: Vec<String>,

    /// Seconds between checks while idle.
    #[arg(short = 's', value_name = "SECS", default_value = "10", value_parser = parse_interval)]
    coarse: Duration,

    /// Seconds between task scans while busy.
    #[arg(short = 't', value_name = "SECS", default_value = "10", value_parser = parse_interval)]
    fine: Duration,

    /// Load average above which the host is busy.
    #[arg(short = 'p', value_name = "LOAD", default_value = "5", value_parser = parse_period)]
    loadavg: f64,

    /// CPU percentage above which the host is busy.
    #[arg(short = 'c', value_name = "PCT", default_value = "80", value_parser = parse_percent)]
    cpu_pct: f64,

    /// Memory percentage above which the host is busy.
    #[arg(short = 'm', value_name = "PCT", default_value = "80", value_parser = parse_percent)]
    mem_pct: f64,

    /// Memory pressure above which the host is busy. 0 never reads it.
    #[arg(short = 'u', value_name = "N", default_value = "100")]
    mem_pressure: u64,

    /// Minimum milli-CPUs for a CPU hog.
    #[arg(short = 'q', value_name = "MCPUS", default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    cpu_floor: u64,

    /// Minimum mrams (thousandths of RAM) for a memory hog.
    #[arg(short = 'r', value_name = "MRAMS", default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    mem_floor: u64,

    /// Minimum block I/O wait, ms per second, for an I/O hog.
    #[arg(short = 'b', value_name = "MS", default_value = "100", value_parser = clap::value_parser!(u64).range(1..))]
    io_floor: u64,

    /// Tasks taken from each ranking pass.
    #[arg(short = 'n', value_name = "N", default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    max_results: u64,

    /// Bytes of command line shown per task.
    #[arg(short = 'L', value_name = "N", default_value = "48", value_parser = clap::value_parser!(u64).range(2..=1000))]
    cmdline_len: u64,

    /// Disk stat file and display name, e.g. /sys/block/sda/stat,sda. Repeatable.
    #[arg(short = 'd', value_name = "PATH,NAME")]
    disks: Vec<DiskSpec>,

    /// Print busy reports as JSON lines.
    #[arg(long)]
    json: bool,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to /sys filesystem.
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(long)]
    quiet: bool,
}

impl Args {
    fn monitor_config(&self) -> MonitorConfig {
        let mut counters = Vec::new();
        if self.php {
            counters.push(NameCounter::php());
        }
        if self.httpd {
            counters.push(NameCounter::httpd());
        }
        counters.extend(self.counts.iter().map(|s| NameCounter::new(s.as_str(), s.as_str())));

        MonitorConfig {
            dimensions: Dimensions::from_flags(self.cpu, self.memory, self.block_io),
            counters,
            coarse_interval: self.coarse,
            fine_interval: self.fine,
            busy: BusyThresholds {
                loadavg: self.loadavg,
                cpu_pct: self.cpu_pct,
                mem_pct: self.mem_pct,
                mem_pressure: self.mem_pressure,
            },
            floors: HogFloors {
                cpu: self.cpu_floor,
                memory: self.mem_floor,
                block_io: self.io_floor,
            },
            max_results: self.max_results as usize,
            cmdline_len: self.cmdline_len as usize,
            disks: self.disks.clone(),
            proc_path: self.proc_path.clone(),
            sys_path: self.sys_path.clone(),
        }
    }
}

/// Parses a positive number of seconds (or a load average), at least 0.001.
fn parse_period(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    if !value.is_finite() || value < 0.001 {
        return Err(format!("'{}' must be at least 0.001", s));
    }
    Ok(value)
}

/// Parses a polling interval in seconds, at least 0.001.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let secs = parse_period(s)?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{}' is not a usable interval: {}", s, e))
}

fn parse_percent(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid percentage '{}': {}", s, e))?;
    if !(0.1..=100.0).contains(&value) {
        return Err(format!("'{}' must be between 0.1 and 100", s));
    }
    Ok(value)
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use --quiet for errors only. Logs go to stderr.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for krate in ["batchtop", "batchtop_core"] {
        match format!("{}={}", krate, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring log directive for {}: {}", krate, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: MonitorConfig, json: bool, running: &AtomicBool) -> batchtop_core::Result<()> {
    let fs = RealFs::new();
    let host = HostContext::detect(&fs, &config.proc_path, &config.sys_path)?;
    info!(
        ticks_per_sec = host.ticks_per_sec,
        page_kb = host.page_kb,
        ram_kb = host.ram_kb,
        cpus = host.cpu_count,
        "host"
    );

    let reporter = AnyReporter::new(std::io::stdout().lock(), json);
    let mut monitor = Monitor::new(fs, host, config, SystemClock, reporter)?;
    monitor.run(running)
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = args.monitor_config();
    info!("batchtop {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: watch={}s, inspect={}s, busy above loadavg {} / cpu {}% / mem {}% / pressure {}",
        args.coarse.as_secs_f64(),
        args.fine.as_secs_f64(),
        config.busy.loadavg,
        config.busy.cpu_pct,
        config.busy.mem_pct,
        config.busy.mem_pressure
    );
    info!(
        "Hogs: dimensions={:?}, floors={:?}, max={}, disks={}",
        config.dimensions.passes().collect::<Vec<_>>(),
        config.floors,
        config.max_results,
        config.disks.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Cannot install signal handler: {}", e);
    }

    if let Err(e) = run(config, args.json, &running) {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }

    info!("batchtop stopped");
}
