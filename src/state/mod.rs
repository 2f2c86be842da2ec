//! Devstate management.
//!
//! This module records what a running `astra dev` session exposes:
//! - forwarded ports, per container and endpoint
//! - the port of the local API server
//!
//! The state lives in `.astra/devstate.<pid>.json`, next to the devfile.

mod local;
mod store;
mod types;

pub use local::{DevstateStore, PidChecker};
pub use store::StateStore;
pub use types::{Content, ForwardedPort, Platform};
