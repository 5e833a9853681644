//! Engine Runner - supervise an engine process with save-gated restarts.

pub mod config;
pub mod display;
pub mod process;
pub mod runner;
pub mod save;
