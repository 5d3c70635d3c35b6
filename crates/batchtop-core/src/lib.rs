//! batchtop-core: adaptive detection of resource-hogging tasks.
//!
//! Provides:
//! - `collector`: `/proc` and `/sys` readers behind a mockable filesystem
//! - `model`: per-task samples and snapshots
//! - `rank`: merge-join of two snapshots and per-dimension hog selection
//! - `scheduler`: the Watch/Inspect polling loop
//! - `report` / `fmt`: text and JSON output
//! - `config` / `error`: settings and error types

pub mod collector;
pub mod config;
pub mod error;
pub mod fmt;
pub mod model;
pub mod rank;
pub mod report;
pub mod scheduler;

pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use scheduler::{Monitor, SystemClock};
