//! Synchronization through tar archives streamed into the container.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AstraError, Result};
use crate::platform::ExecClient;

use super::{index_path, run_index, FileIndex, IgnoreMatcher, IndexChanges, SyncClient, SyncParameters};

/// Sync client uploading tar archives with `tar xf -` in the container.
pub struct TarSync {
    exec: Arc<dyn ExecClient>,
    /// Devstate directory, relative to the component directory.
    devstate_dir: String,
}

impl std::fmt::Debug for TarSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarSync")
            .field("devstate_dir", &self.devstate_dir)
            .finish_non_exhaustive()
    }
}

impl TarSync {
    /// Creates a sync client executing through `exec`.
    #[must_use]
    pub fn new(exec: Arc<dyn ExecClient>, devstate_dir: impl Into<String>) -> Self {
        Self {
            exec,
            devstate_dir: devstate_dir.into(),
        }
    }
}

/// Builds an archive of `files`, relative to `root`.
fn build_archive(root: &Path, files: &[String]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    for rel in files {
        builder.append_path_with_name(root.join(rel), rel)?;
    }
    builder.into_inner()
}

/// Indexes the directory and archives what changed.
fn prepare(params: &SyncParameters, index_file: &Path) -> Result<(IndexChanges, Vec<u8>)> {
    let previous = if params.force_write {
        FileIndex::default()
    } else {
        FileIndex::load(index_file)?
    };

    let mut patterns = super::load_ignores(&params.path);
    patterns.extend(params.ignores.iter().cloned());
    let matcher = IgnoreMatcher::new(&patterns);

    let changes = run_index(&params.path, &matcher, &previous)?;
    let archive = if changes.changed.is_empty() {
        Vec::new()
    } else {
        build_archive(&params.path, &changes.changed)?
    };
    Ok((changes, archive))
}

#[async_trait]
impl SyncClient for TarSync {
    async fn sync_files(&self, params: &SyncParameters) -> Result<bool> {
        let index_file = index_path(&params.path, &self.devstate_dir);

        let (changes, archive) = {
            let params = params.clone();
            let index_file = index_file.clone();
            tokio::task::spawn_blocking(move || prepare(&params, &index_file))
                .await
                .map_err(|e| AstraError::internal(format!("indexing task failed: {e}")))??
        };

        if changes.is_empty() && !params.force_write {
            debug!("No file changes to push");
            return Ok(false);
        }

        if !changes.deleted.is_empty() {
            let mut command = vec![String::from("rm"), String::from("-rf")];
            command.extend(
                changes
                    .deleted
                    .iter()
                    .map(|rel| format!("{}/{}", params.sync_folder.trim_end_matches('/'), rel)),
            );
            self.exec
                .execute_command(&command, &params.pod_name, &params.container_name, false)
                .await?;
        }

        if !changes.changed.is_empty() {
            info!(
                "Syncing {} files into {} of container {}",
                changes.changed.len(),
                params.sync_folder,
                params.container_name
            );
            let command = vec![
                String::from("tar"),
                String::from("xf"),
                String::from("-"),
                String::from("-C"),
                params.sync_folder.clone(),
            ];
            self.exec
                .execute_command_with_stdin(&command, &params.pod_name, &params.container_name, archive)
                .await?;
        }

        let index = changes.index;
        tokio::task::spawn_blocking(move || index.save(&index_file))
            .await
            .map_err(|e| AstraError::internal(format!("index writing task failed: {e}")))??;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeCluster;
    use std::fs;
    use tempfile::TempDir;

    fn params(dir: &Path, force_write: bool) -> SyncParameters {
        SyncParameters {
            path: dir.to_path_buf(),
            pod_name: String::from("api-app-pod"),
            container_name: String::from("runtime"),
            sync_folder: String::from("/projects"),
            ignores: Vec::new(),
            force_write,
        }
    }

    #[test]
    fn test_build_archive_contains_relative_paths() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/app.py"), "print()").expect("write");

        let archive = build_archive(dir.path(), &[String::from("src/app.py")]).expect("archive");
        let mut reader = tar::Archive::new(archive.as_slice());
        let names: Vec<String> = reader
            .entries()
            .expect("entries")
            .map(|e| e.expect("entry").path().expect("path").display().to_string())
            .collect();
        assert_eq!(names, vec!["src/app.py"]);
    }

    #[tokio::test]
    async fn test_sync_pushes_changes_once() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("main.go"), "package main").expect("write");
        let cluster = Arc::new(FakeCluster::new());
        let sync = TarSync::new(cluster.clone(), ".astra");

        assert!(sync.sync_files(&params(dir.path(), true)).await.expect("sync"));
        assert!(!sync.sync_files(&params(dir.path(), false)).await.expect("sync"));

        let calls = cluster.exec_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "tar xf - -C /projects");
        assert!(dir.path().join(".astra").join(super::super::INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_sync_removes_deleted_files() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        fs::write(dir.path().join("b.txt"), "b").expect("write");
        let cluster = Arc::new(FakeCluster::new());
        let sync = TarSync::new(cluster.clone(), ".astra");
        sync.sync_files(&params(dir.path(), true)).await.expect("sync");

        fs::remove_file(dir.path().join("b.txt")).expect("remove");
        assert!(sync.sync_files(&params(dir.path(), false)).await.expect("sync"));

        let calls = cluster.exec_calls();
        assert_eq!(calls.last().map(|c| c.command.as_str()), Some("rm -rf /projects/b.txt"));
    }
}
