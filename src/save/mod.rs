//! Save completion notifications and the watcher that gates runner restarts.

mod operation;
mod watcher;

pub use operation::*;
pub use watcher::*;
