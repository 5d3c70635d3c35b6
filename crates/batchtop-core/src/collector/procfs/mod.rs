//! Readers for the Linux `/proc` filesystem.
//!
//! `parser` holds the pure text parsers; `system` and `task` own the open
//! sources and turn parsed records into load readings and task snapshots.

pub mod parser;
pub mod system;
pub mod task;

pub use system::{LoadSample, SystemProbe};
pub use task::{TaskCollector, UNKNOWN_CMDLINE};
