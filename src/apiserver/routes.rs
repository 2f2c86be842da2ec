//! Handlers of `/api/v1`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::component::describe::{describe_devfile_component, filter_by_platform};
use crate::devfile;

use super::ApiState;

/// Name of the only command `POST /component/command` accepts.
const PUSH_COMMAND: &str = "push";

/// Body of a successful call without payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneralSuccess {
    /// What happened.
    pub message: String,
}

/// Body of a failed call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneralError {
    /// What went wrong.
    pub message: String,
}

/// Body of `GET /instance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// PID of the `astra dev` process.
    pub pid: u32,
    /// Directory of the component.
    pub component_directory: PathBuf,
    /// State reached by the last reconcile.
    pub component_state: String,
}

/// Body of `POST /component/command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command to run.
    pub name: String,
}

/// Body of `GET /devfile` and `PUT /devfile`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevfileContent {
    /// Devfile YAML.
    pub content: String,
}

fn success(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(GeneralSuccess {
            message: message.into(),
        }),
    )
        .into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(GeneralError {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn instance_get(State(state): State<ApiState>) -> Json<InstanceInfo> {
    Json(InstanceInfo {
        pid: state.pid,
        component_directory: state.working_dir.clone(),
        component_state: state.session.component_state().to_string(),
    })
}

async fn instance_delete(State(state): State<ApiState>) -> Response {
    state.session.cancel();
    success(format!("'astra dev' instance with pid: {} is shutting down.", state.pid))
}

async fn component_get(State(state): State<ApiState>) -> Response {
    let devfile = match devfile::parse_and_validate(&state.devfile_path, state.variables.clone()) {
        Ok(devfile) => devfile,
        Err(e) => {
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error getting the description of the component: {e}"),
            );
        }
    };
    let ports = match state.session.state().get_forwarded_ports().await {
        Ok(ports) => filter_by_platform(ports, Some(state.platform)),
        Err(e) => {
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error getting the description of the component: {e}"),
            );
        }
    };
    let description = describe_devfile_component(
        &devfile,
        &state.devfile_path,
        &state.component_name,
        ports,
        state.cluster.as_deref(),
        state.podman.as_deref(),
    )
    .await;
    (StatusCode::OK, Json(description)).into_response()
}

async fn component_command_post(State(state): State<ApiState>, Json(request): Json<CommandRequest>) -> Response {
    if request.name != PUSH_COMMAND {
        return failure(
            StatusCode::BAD_REQUEST,
            format!(
                "command name {:?} not supported. Supported values are: {:?}",
                request.name, PUSH_COMMAND
            ),
        );
    }
    if state.session.request_push() {
        success("push was successfully executed")
    } else {
        failure(
            StatusCode::TOO_MANY_REQUESTS,
            "a push operation is not possible at this time. Please retry later",
        )
    }
}

async fn devfile_get(State(state): State<ApiState>) -> Response {
    match fs::read_to_string(&state.devfile_path).await {
        Ok(content) => (StatusCode::OK, Json(DevfileContent { content })).into_response(),
        Err(e) => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("error getting Devfile content: {e}"),
        ),
    }
}

/// Parses and validates `content` from a scratch directory, away from the
/// devfile in use.
async fn validate_in_scratch_dir(state: &ApiState, content: &str) -> Result<(), Response> {
    let dir = std::env::temp_dir().join(format!("astra-{}", Uuid::new_v4()));
    let path = dir.join("devfile.yaml");
    let saved = async {
        fs::create_dir_all(&dir).await?;
        fs::write(&path, content).await
    }
    .await;

    let result = match saved {
        Err(e) => Err(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("error saving temp Devfile: {e}"),
        )),
        Ok(()) => devfile::parse_and_validate(&path, state.variables.clone())
            .map(|_| ())
            .map_err(|e| {
                failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("error validating Devfile: {e}"),
                )
            }),
    };

    if let Err(e) = fs::remove_dir_all(&dir).await {
        debug!("Error deleting temp directory {}: {}", dir.display(), e);
    }
    result
}

async fn write_through(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await
}

async fn devfile_put(State(state): State<ApiState>, Json(body): Json<DevfileContent>) -> Response {
    if let Err(response) = validate_in_scratch_dir(&state, &body.content).await {
        return response;
    }
    if let Err(e) = write_through(&state.devfile_path, &body.content).await {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("error writing Devfile content to {:?}: {e}", state.devfile_path),
        );
    }
    info!("Devfile updated through the API server");
    success("devfile has been successfully written to disk")
}

/// Routes of the API server.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/instance", get(instance_get).delete(instance_delete))
        .route("/api/v1/component", get(component_get))
        .route("/api/v1/component/command", post(component_command_post))
        .route("/api/v1/devfile", get(devfile_get).put(devfile_put))
        .with_state(state)
}
