//! Engine process supervision: run state, log and the runner task.

mod error;
mod log;
#[allow(clippy::module_inception)]
mod runner;
mod state;

pub use error::*;
pub use log::*;
pub use runner::*;
pub use state::*;
