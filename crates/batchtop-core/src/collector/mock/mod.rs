//! Mock filesystem for testing without Linux.
//!
//! Provides `MockFs` and pre-built scenarios.

mod filesystem;
mod scenarios;

pub use filesystem::{MockFs, task_stat_line};
pub use scenarios::MOCK_RAM_KB;
