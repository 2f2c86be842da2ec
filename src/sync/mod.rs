//! Source synchronization into the dev container.
//!
//! Changes are detected with a hashed index of the component directory,
//! then uploaded as a tar archive extracted in the container.

mod ignore;
mod index;
mod tar_sync;

pub use ignore::{load_ignores, IgnoreMatcher, DEFAULT_IGNORES};
pub use index::{index_path, run_index, FileData, FileIndex, IndexChanges, INDEX_FILE};
pub use tar_sync::TarSync;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::PathBuf;

use crate::error::Result;

/// What to synchronize, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncParameters {
    /// Local component directory.
    pub path: PathBuf,
    /// Target pod.
    pub pod_name: String,
    /// Container mounting the sources.
    pub container_name: String,
    /// Source directory inside the container.
    pub sync_folder: String,
    /// Extra ignore patterns.
    pub ignores: Vec<String>,
    /// Push every file, not only the changed ones.
    pub force_write: bool,
}

/// File synchronization client.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Pushes local changes into the container.
    ///
    /// Returns true when something was pushed, meaning the build and run
    /// commands have to be executed again.
    async fn sync_files(&self, params: &SyncParameters) -> Result<bool>;
}
