//! Local HTTP API of a dev session.
//!
//! Served on the loopback interface under `/api/v1`, for editors and the
//! `astra` web UI to inspect the session, request pushes and edit the
//! devfile.

mod routes;

pub use routes::{router, CommandRequest, DevfileContent, GeneralError, GeneralSuccess, InstanceInfo};

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dev::DevSession;
use crate::error::{AstraError, Result};
use crate::platform::{PodmanClient, ResourceClient};
use crate::state::Platform;

/// First port tried when none is requested.
pub const DEFAULT_START_PORT: u16 = 20000;

/// Last port tried when none is requested.
pub const DEFAULT_END_PORT: u16 = 30001;

/// What the handlers work with.
#[derive(Clone)]
pub struct ApiState {
    /// Session served.
    pub session: Arc<DevSession>,
    /// Devfile of the component.
    pub devfile_path: PathBuf,
    /// PID of the `astra dev` process.
    pub pid: u32,
    /// Directory of the component.
    pub working_dir: PathBuf,
    /// Component name.
    pub component_name: String,
    /// Devfile variable overrides, applied when validating a new devfile.
    pub variables: BTreeMap<String, String>,
    /// Platform of the session.
    pub platform: Platform,
    /// Cluster access, to find where the component runs.
    pub cluster: Option<Arc<dyn ResourceClient>>,
    /// Podman access, to find where the component runs.
    pub podman: Option<Arc<dyn PodmanClient>>,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("devfile_path", &self.devfile_path)
            .field("pid", &self.pid)
            .field("component_name", &self.component_name)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl ApiState {
    /// State for `session`, serving the devfile at `devfile_path`.
    #[must_use]
    pub fn new(session: Arc<DevSession>, devfile_path: PathBuf, component_name: impl Into<String>) -> Self {
        let working_dir = devfile_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            session,
            devfile_path,
            pid: std::process::id(),
            working_dir,
            component_name: component_name.into(),
            variables: BTreeMap::new(),
            platform: Platform::Cluster,
            cluster: None,
            podman: None,
        }
    }

    /// Sets the devfile variable overrides.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the platform of the session and the clients used to describe
    /// the component.
    #[must_use]
    pub fn with_platform(
        mut self,
        platform: Platform,
        cluster: Option<Arc<dyn ResourceClient>>,
        podman: Option<Arc<dyn PodmanClient>>,
    ) -> Self {
        self.platform = platform;
        self.cluster = cluster;
        self.podman = podman;
        self
    }
}

async fn bind(port: Option<u16>) -> Result<TcpListener> {
    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| AstraError::internal(format!("unable to start the API server on port {port}: {e}")));
    }
    for candidate in DEFAULT_START_PORT..=DEFAULT_END_PORT {
        if let Ok(listener) = TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).await {
            return Ok(listener);
        }
    }
    Err(AstraError::internal(format!(
        "no free port between {DEFAULT_START_PORT} and {DEFAULT_END_PORT} for the API server"
    )))
}

/// Starts the API server on `port`, or on the first free port from
/// [`DEFAULT_START_PORT`], and records the port in the devstate.
///
/// The server stops when the session is cancelled.
///
/// # Errors
///
/// Returns an error when the requested port is used by another session or
/// cannot be bound.
pub async fn start(state: ApiState, port: Option<u16>) -> Result<(SocketAddr, JoinHandle<()>)> {
    if let Some(port) = port {
        if state.session.state().is_api_server_running(port).await? {
            return Err(AstraError::internal(format!(
                "unable to start the API server on port {port}: another astra dev session uses it"
            )));
        }
    }

    let listener = bind(port).await?;
    let addr = listener.local_addr()?;
    state.session.state().set_api_server_port(addr.port()).await?;

    let token = state.session.token();
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            error!("API server stopped: {}", e);
        }
    });

    info!("API Server started at http://{}/api/v1", addr);
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DevstateStore, StateStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_over_socket() {
        let dir = TempDir::new().expect("tempdir");
        let devfile_path = dir.path().join("devfile.yaml");
        std::fs::write(&devfile_path, "schemaVersion: 2.2.0\nmetadata:\n  name: api\n").expect("write");
        let store = Arc::new(DevstateStore::new(dir.path().join(".astra")));
        store.init(Platform::Podman).await.expect("init");
        let session = Arc::new(DevSession::new(store.clone()));
        let _rx = session.take_push_receiver();

        let state = ApiState::new(session.clone(), devfile_path, "api");
        let (addr, handle) = start(state, Some(0)).await.expect("start");
        assert_eq!(store.get_api_server_port().await.expect("port"), Some(addr.port()));

        let client = reqwest::Client::new();
        let info: InstanceInfo = client
            .get(format!("http://{addr}/api/v1/instance"))
            .send()
            .await
            .expect("get")
            .json()
            .await
            .expect("json");
        assert_eq!(info.pid, std::process::id());
        assert_eq!(info.component_directory, dir.path().to_path_buf());

        let response = client
            .post(format!("http://{addr}/api/v1/component/command"))
            .json(&CommandRequest {
                name: String::from("push"),
            })
            .send()
            .await
            .expect("post");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = client
            .delete(format!("http://{addr}/api/v1/instance"))
            .send()
            .await
            .expect("delete");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(session.is_cancelled());
        handle.await.expect("server task");
    }
}
