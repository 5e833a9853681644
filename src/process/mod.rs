//! Engine process spawning, termination and startup artifacts.

mod artifact;
mod spawn;

pub use artifact::*;
pub use spawn::*;
