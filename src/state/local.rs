//! File-based devstate storage.
//!
//! Each `astra dev` process writes `devstate.<pid>.json` in the devstate
//! directory. The first instance also owns `devstate.json`, kept for tools
//! that only know about a single session.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::store::StateStore;
use super::types::{Content, ForwardedPort, Platform};

/// File owned by the first session.
const LEGACY_STATE_FILE: &str = "devstate.json";

/// Prefix of per-process state files.
const STATE_FILE_PREFIX: &str = "devstate.";

/// Suffix of state files.
const STATE_FILE_SUFFIX: &str = ".json";

/// Tells whether a process is still alive.
pub type PidChecker = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// Devstate store backed by JSON files.
pub struct DevstateStore {
    /// Directory holding the state files.
    dir: PathBuf,
    /// PID of this session.
    pid: u32,
    /// Last content written by this session.
    content: Mutex<Content>,
    /// Process liveness check.
    pid_alive: PidChecker,
}

impl std::fmt::Debug for DevstateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevstateStore")
            .field("dir", &self.dir)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl DevstateStore {
    /// Creates a store for the current process.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_pid(dir, std::process::id(), Arc::new(pid_exists))
    }

    /// Creates a store for `pid`, checking other sessions with `pid_alive`.
    #[must_use]
    pub fn with_pid(dir: impl Into<PathBuf>, pid: u32, pid_alive: PidChecker) -> Self {
        Self {
            dir: dir.into(),
            pid,
            content: Mutex::new(Content::default()),
            pid_alive,
        }
    }

    /// Directory holding the state files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pid_file(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{STATE_FILE_PREFIX}{pid}{STATE_FILE_SUFFIX}"))
    }

    fn legacy_file(&self) -> PathBuf {
        self.dir.join(LEGACY_STATE_FILE)
    }

    /// Reads every per-process state file.
    async fn read_all(&self) -> Result<Vec<Content>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await.map_err(io_error)?;
        let mut contents = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name();
            let Some(pid) = parse_pid_file_name(&name.to_string_lossy()) else {
                continue;
            };
            match read_content(&entry.path()).await {
                Ok(content) => contents.push(content),
                Err(e) => debug!("Ignoring unreadable state file of PID {}: {}", pid, e),
            }
        }
        Ok(contents)
    }

    /// Contents of live sessions other than this one.
    async fn others(&self) -> Result<Vec<Content>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|c| c.pid != 0 && c.pid != self.pid && (self.pid_alive)(c.pid))
            .collect())
    }

    async fn check_first_in_platform(&self, platform: Platform) -> Result<()> {
        if let Some(other) = self.others().await?.into_iter().find(|c| c.platform == platform) {
            return Err(StateError::AlreadyRunning {
                platform: platform.to_string(),
                pid: other.pid,
            }
            .into());
        }
        Ok(())
    }

    /// Whether `devstate.json` is unused or already ours.
    async fn legacy_free_or_owned(&self) -> Result<bool> {
        let path = self.legacy_file();
        if !path.exists() {
            return Ok(true);
        }
        let Ok(saved) = read_content(&path).await else {
            return Ok(true);
        };
        Ok(saved.pid == 0 || saved.pid == self.pid || !(self.pid_alive)(saved.pid))
    }

    async fn save(&self, content: &Content) -> Result<()> {
        self.check_first_in_platform(content.platform).await?;

        fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        write_atomic(&self.pid_file(self.pid), content).await?;

        if self.legacy_free_or_owned().await? {
            write_atomic(&self.legacy_file(), content).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for DevstateStore {
    async fn init(&self, platform: Platform) -> Result<()> {
        let mut content = self.content.lock().await;
        *content = Content {
            pid: self.pid,
            platform,
            forwarded_ports: Vec::new(),
            api_server_port: None,
        };
        info!("Recording dev session state in: {}", self.dir.display());
        self.save(&content).await
    }

    async fn set_forwarded_ports(&self, ports: Vec<ForwardedPort>) -> Result<()> {
        let mut content = self.content.lock().await;
        content.pid = self.pid;
        content.forwarded_ports = ports;
        self.save(&content).await
    }

    async fn get_forwarded_ports(&self) -> Result<Vec<ForwardedPort>> {
        let own = self.content.lock().await.forwarded_ports.clone();
        let mut ports = own;
        for other in self.others().await? {
            ports.extend(other.forwarded_ports);
        }
        Ok(ports)
    }

    async fn get_other_forwarded_ports(&self) -> Result<Vec<ForwardedPort>> {
        Ok(self
            .others()
            .await?
            .into_iter()
            .flat_map(|c| c.forwarded_ports)
            .collect())
    }

    async fn set_api_server_port(&self, port: u16) -> Result<()> {
        let mut content = self.content.lock().await;
        content.pid = self.pid;
        content.api_server_port = Some(port);
        self.save(&content).await
    }

    async fn get_api_server_port(&self) -> Result<Option<u16>> {
        Ok(self.content.lock().await.api_server_port)
    }

    async fn is_api_server_running(&self, port: u16) -> Result<bool> {
        Ok(self
            .others()
            .await?
            .iter()
            .any(|c| c.api_server_port == Some(port)))
    }

    async fn save_exit(&self) -> Result<()> {
        let mut content = self.content.lock().await;
        *content = Content::default();

        let pid_file = self.pid_file(self.pid);
        if pid_file.exists() {
            fs::remove_file(&pid_file).await.map_err(io_error)?;
        }

        let legacy = self.legacy_file();
        if legacy.exists() && read_content(&legacy).await.is_ok_and(|c| c.pid == self.pid) {
            write_atomic(&legacy, &content).await?;
        }

        debug!("Removed dev session state of PID {}", self.pid);
        Ok(())
    }
}

/// Extracts the PID from `devstate.<pid>.json`.
fn parse_pid_file_name(name: &str) -> Option<u32> {
    name.strip_prefix(STATE_FILE_PREFIX)?
        .strip_suffix(STATE_FILE_SUFFIX)?
        .parse()
        .ok()
}

async fn read_content(path: &Path) -> Result<Content> {
    let raw = fs::read_to_string(path).await.map_err(|e| StateError::Corrupted {
        message: format!("Failed to read state file {}: {e}", path.display()),
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse state file {}: {e}", path.display()),
        }
        .into()
    })
}

/// Writes to a temporary file, then renames it over `path`.
async fn write_atomic(path: &Path, content: &Content) -> Result<()> {
    let json = serde_json::to_string_pretty(content).map_err(|e| StateError::SerializationError {
        message: format!("Failed to serialize state: {e}"),
    })?;

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).await.map_err(io_error)?;
    file.write_all(json.as_bytes()).await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    fs::rename(&temp_path, path).await.map_err(io_error)?;

    debug!("State saved to: {}", path.display());
    Ok(())
}

fn io_error(e: std::io::Error) -> StateError {
    StateError::Io {
        message: e.to_string(),
    }
}

/// Liveness check through `/proc`; assumes alive where `/proc` is absent.
fn pid_exists(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if proc_root.is_dir() {
        proc_root.join(pid.to_string()).exists()
    } else {
        true
    }
}
