//! Error types for astra.
//!
//! One top-level [`AstraError`] wraps the error families of each layer:
//! devfile handling, devstate persistence, platform access (Kubernetes or
//! Podman), command execution and reconciliation. Advisory conditions use
//! [`AstraError::Warning`]; callers log them and keep going.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for astra.
#[derive(Debug, Error)]
pub enum AstraError {
    /// Devfile errors.
    #[error("{0}")]
    Devfile(#[from] DevfileError),

    /// Environment or preference errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Devstate persistence errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Kubernetes or Podman errors.
    #[error("{0}")]
    Platform(#[from] PlatformError),

    /// Command execution errors.
    #[error("{0}")]
    Exec(#[from] ExecError),

    /// Reconciliation errors.
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),

    /// Advisory error. Logged, never aborts the caller.
    #[error("{0}")]
    Warning(String),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Devfile-related errors.
#[derive(Debug, Error)]
pub enum DevfileError {
    /// The devfile was not found.
    #[error("The current directory does not contain a devfile: {path}")]
    FileNotFound {
        /// Path that was searched.
        path: PathBuf,
    },

    /// The devfile could not be parsed.
    #[error("unable to parse devfile: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("devfile validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// No command matches the requested name or kind.
    #[error("{}", command_not_found_message(name.as_deref(), kind))]
    CommandNotFound {
        /// Requested command name, if any.
        name: Option<String>,
        /// Requested command group kind.
        kind: String,
    },

    /// A command references a component that does not exist.
    #[error("component {name:?} not found in devfile")]
    ComponentNotFound {
        /// Component name.
        name: String,
    },

    /// A `{{VAR}}` reference could not be resolved.
    #[error("variable {name:?} is referenced in the devfile but not defined")]
    VariableNotFound {
        /// Variable name.
        name: String,
    },
}

fn command_not_found_message(name: Option<&str>, kind: &str) -> String {
    match name {
        Some(name) => format!("no {kind} command with name {name:?} found in devfile"),
        None => format!("no default {kind} command found in devfile"),
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be parsed.
    #[error("failed to parse {location}: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// File being parsed.
        location: String,
    },

    /// An environment variable holds an unusable value.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },
}

/// Devstate persistence errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file is unreadable or malformed.
    #[error("state is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("state serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Another dev session already runs on the platform.
    #[error("astra dev is already running on {platform} with PID {pid}")]
    AlreadyRunning {
        /// Platform name.
        platform: String,
        /// PID of the other session.
        pid: u32,
    },

    /// Filesystem error while writing state.
    #[error("unable to write state: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },
}

/// Errors from the Kubernetes or Podman backends.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// No pod matches the selector.
    #[error("pod not found for the selector: {selector}")]
    PodNotFound {
        /// Label selector used for the lookup.
        selector: String,
    },

    /// The user lacks permission for the operation.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Message from the API server.
        message: String,
    },

    /// The cluster rejected the credentials.
    #[error(
        "Unauthorized to access the cluster\nPlease login to your server: \n\nastra login https://mycluster.mydomain.com\n"
    )]
    Unauthorized,

    /// A named resource does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// A named resource already exists or was modified concurrently.
    #[error("conflict on {kind} {name:?}")]
    Conflict {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// Any other Kubernetes API failure.
    #[error("kubernetes API error: {message}")]
    Api {
        /// Description of the failure.
        message: String,
    },

    /// An operation did not finish in time.
    #[error("timeout after {seconds}s waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Timeout in seconds.
        seconds: u64,
    },

    /// The podman binary failed.
    #[error("podman: {message}")]
    Podman {
        /// Description of the failure.
        message: String,
    },
}

/// Command execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A command exited with a non-zero status.
    #[error("command {command:?} failed in container {container:?} (exit code {exit_code})")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Target container.
        container: String,
        /// Exit code, `-1` when unknown.
        exit_code: i32,
        /// Tail of the command output.
        logs: Vec<String>,
    },

    /// One or more children of a parallel composite command failed.
    #[error("composite command {command:?} failed: {}", failures.join("; "))]
    Composite {
        /// Composite command id.
        command: String,
        /// One message per failed child.
        failures: Vec<String>,
    },

    /// A command of an unsupported type was requested.
    #[error("command {command:?} is not supported: {reason}")]
    Unsupported {
        /// Command id.
        command: String,
        /// Why it cannot run.
        reason: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Port forwarding could not be started.
    #[error("fail starting the port forwarding: {message}")]
    PortForward {
        /// Description of the failure.
        message: String,
    },

    /// Application ports are bound on the loopback interface only.
    #[error("cannot make port forwarding work with ports bound to the loopback interface only")]
    LoopbackPorts,

    /// Reconciliation was aborted.
    #[error("reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for astra operations.
pub type Result<T> = std::result::Result<T, AstraError>;

impl AstraError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a new warning.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    /// Returns true for not-found conditions, which callers treat as success.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Platform(PlatformError::NotFound { .. } | PlatformError::PodNotFound { .. })
        )
    }

    /// Returns true when the cluster denied the operation.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Platform(PlatformError::Forbidden { .. }))
    }

    /// Returns true for advisory errors.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    /// Returns true for errors ending the dev session instead of waiting
    /// for the next change.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Reconcile(ReconcileError::PortForward { .. } | ReconcileError::LoopbackPorts)
        )
    }
}

impl DevfileError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl PlatformError {
    /// Creates a generic API error.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Creates a podman error.
    #[must_use]
    pub fn podman(message: impl Into<String>) -> Self {
        Self::Podman {
            message: message.into(),
        }
    }
}

impl From<kube::Error> for PlatformError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(status) => match status.code {
                401 => Self::Unauthorized,
                403 => Self::Forbidden {
                    message: status.message.clone(),
                },
                404 => Self::NotFound {
                    kind: String::from("resource"),
                    name: status.message.clone(),
                },
                409 => Self::Conflict {
                    kind: String::from("resource"),
                    name: status.message.clone(),
                },
                _ => Self::api(err.to_string()),
            },
            _ => Self::api(err.to_string()),
        }
    }
}

impl From<kube::Error> for AstraError {
    fn from(err: kube::Error) -> Self {
        Self::Platform(err.into())
    }
}
