//! Watch loop of a dev session.
//!
//! Reconciles the component once, then again each time local files change,
//! the devfile is edited, or a push is requested through the session.

mod status;
mod watcher;

pub use status::{ComponentStatus, State};
pub use watcher::{WatchClient, DEFAULT_WAITING_RETRY_INTERVAL};
