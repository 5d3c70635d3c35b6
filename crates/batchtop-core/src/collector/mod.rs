//! Data collection from `/proc` and `/sys`.
//!
//! Every reader goes through the [`FileSystem`] trait so the whole monitor can
//! run against an in-memory tree in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Monitor                            │
//! │  ┌───────────────┐  ┌────────────────┐  ┌─────────────────┐  │
//! │  │  SystemProbe  │  │ TaskCollector  │  │   DiskTracker   │  │
//! │  │ - loadavg     │  │ - [pid]/stat   │  │ - block stat    │  │
//! │  │ - stat        │  │ - [pid]/cmdline│  │   queue time    │  │
//! │  │ - meminfo     │  └───────┬────────┘  └────────┬────────┘  │
//! │  │ - cpuset      │          │                    │           │
//! │  └───────┬───────┘          │                    │           │
//! │          └──────────────────┼────────────────────┘           │
//! │                      ┌──────▼──────┐                         │
//! │                      │  FileSystem │ (trait)                 │
//! │                      └──────┬──────┘                         │
//! └─────────────────────────────┼────────────────────────────────┘
//!                       ┌───────┴───────┐
//!                ┌──────▼──────┐ ┌──────▼──────┐
//!                │   RealFs    │ │   MockFs    │
//!                │  (Linux)    │ │  (Testing)  │
//!                └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use batchtop_core::collector::{HostContext, MockFs, TaskCollector};
//!
//! let fs = MockFs::typical_system();
//! let host = HostContext::new(100, 4, 16_384_000, 4);
//! let mut tasks = TaskCollector::new(fs, "/proc", host);
//! let snapshot = tasks.build_snapshot().unwrap();
//! assert_eq!(snapshot.count(), 5);
//! ```

pub mod disk;
pub mod host;
pub mod mock;
pub mod procfs;
pub mod traits;

pub use disk::{DiskRate, DiskTracker};
pub use host::HostContext;
pub use mock::MockFs;
pub use procfs::{LoadSample, SystemProbe, TaskCollector};
pub use traits::{FileSystem, RealFs, Source};
