//! Hashed index of the component directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, StateError};

use super::IgnoreMatcher;

/// Name of the index file, inside the devstate directory.
pub const INDEX_FILE: &str = "astra-file-index.json";

/// Location of the index of `dir`.
#[must_use]
pub fn index_path(dir: &Path, devstate_dir: &str) -> PathBuf {
    dir.join(devstate_dir).join(INDEX_FILE)
}

/// What is known about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
}

/// Files of the component directory, keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    /// Indexed files.
    pub files: BTreeMap<String, FileData>,
}

/// Outcome of [`run_index`].
#[derive(Debug, Clone, Default)]
pub struct IndexChanges {
    /// New or modified files.
    pub changed: Vec<String>,
    /// Files gone since the previous index.
    pub deleted: Vec<String>,
    /// Index of the current content.
    pub index: FileIndex,
}

impl IndexChanges {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

impl FileIndex {
    /// Loads the index at `path`; a missing file is an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StateError::Corrupted {
                    message: format!("{}: {e}", path.display()),
                }
                .into()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the index to `path` through a temporary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| StateError::SerializationError {
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn walk(root: &Path, dir: &Path, matcher: &IgnoreMatcher, out: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        if matcher.is_ignored(rel) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, matcher, out)?;
        } else if file_type.is_file() {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((key, path));
        }
    }
    Ok(())
}

/// Indexes `dir` and compares it with `previous`.
///
/// Files whose size and modification time did not move keep their
/// previous hash without being read again.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub fn run_index(dir: &Path, matcher: &IgnoreMatcher, previous: &FileIndex) -> Result<IndexChanges> {
    let mut files = Vec::new();
    walk(dir, dir, matcher, &mut files)?;

    let mut changes = IndexChanges::default();
    for (key, path) in files {
        let metadata = fs::metadata(&path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let size = metadata.len();

        let data = match previous.files.get(&key) {
            Some(old) if old.size == size && old.modified == modified => old.clone(),
            old => {
                let data = FileData {
                    size,
                    modified,
                    sha256: hash_file(&path)?,
                };
                if old.is_none_or(|o| o.sha256 != data.sha256) {
                    changes.changed.push(key.clone());
                }
                data
            }
        };
        changes.index.files.insert(key, data);
    }

    changes.deleted = previous
        .files
        .keys()
        .filter(|k| !changes.index.files.contains_key(*k))
        .cloned()
        .collect();

    debug!(
        "Indexed {} files: {} changed, {} deleted",
        changes.index.files.len(),
        changes.changed.len(),
        changes.deleted.len()
    );
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn matcher() -> IgnoreMatcher {
        IgnoreMatcher::new(&[String::from(".astra"), String::from("*.log")])
    }

    #[test]
    fn test_first_index_reports_everything() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/main.go"), "package main").expect("write");
        fs::write(dir.path().join("app.log"), "noise").expect("write");

        let changes = run_index(dir.path(), &matcher(), &FileIndex::default()).expect("index");
        assert_eq!(changes.changed, vec![String::from("src/main.go")]);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_unchanged_then_modified_then_deleted() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        fs::write(dir.path().join("b.txt"), "two").expect("write");

        let first = run_index(dir.path(), &matcher(), &FileIndex::default()).expect("index");
        let second = run_index(dir.path(), &matcher(), &first.index).expect("index");
        assert!(second.is_empty());

        fs::write(dir.path().join("a.txt"), "one, edited").expect("write");
        fs::remove_file(dir.path().join("b.txt")).expect("remove");
        let third = run_index(dir.path(), &matcher(), &second.index).expect("index");
        assert_eq!(third.changed, vec![String::from("a.txt")]);
        assert_eq!(third.deleted, vec![String::from("b.txt")]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "one").expect("write");
        let changes = run_index(dir.path(), &matcher(), &FileIndex::default()).expect("index");

        let path = index_path(dir.path(), ".astra");
        changes.index.save(&path).expect("save");
        assert_eq!(FileIndex::load(&path).expect("load"), changes.index);
        assert_eq!(
            FileIndex::load(&dir.path().join("missing.json")).expect("load"),
            FileIndex::default()
        );
    }
}
