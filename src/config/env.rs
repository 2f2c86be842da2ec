//! Environment configuration.
//!
//! Values come from the process environment, after an optional `.env`
//! file next to the devfile has been loaded.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::parse_duration;

/// Default podman binary.
pub const DEFAULT_PODMAN_CMD: &str = "podman";

/// Default docker binary.
pub const DEFAULT_DOCKER_CMD: &str = "docker";

/// Default devstate directory, relative to the component directory.
pub const DEFAULT_DEVSTATE_DIR: &str = ".astra";

/// Delimiter of list-valued variables.
const LIST_DELIMITER: char = ';';

/// Settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// `PODMAN_CMD`.
    pub podman_cmd: String,
    /// `DOCKER_CMD`.
    pub docker_cmd: String,
    /// `PODMAN_CMD_INIT_TIMEOUT`: how long to wait for `podman version`.
    pub podman_cmd_init_timeout: Duration,
    /// `ASTRA_PUSH_IMAGES`: push images after building them.
    pub push_images: bool,
    /// `ASTRA_IMAGE_BUILD_ARGS`, `;`-separated.
    pub image_build_args: Vec<String>,
    /// `ASTRA_CONTAINER_BACKEND_GLOBAL_ARGS`, `;`-separated.
    pub container_backend_global_args: Vec<String>,
    /// `ASTRA_CONTAINER_RUN_ARGS`, `;`-separated.
    pub container_run_args: Vec<String>,
    /// `ASTRA_DEVSTATE_DIR`.
    pub devstate_dir: String,
    /// `GLOBALASTRACONFIG`: preference file override.
    pub global_config: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            podman_cmd: String::from(DEFAULT_PODMAN_CMD),
            docker_cmd: String::from(DEFAULT_DOCKER_CMD),
            podman_cmd_init_timeout: Duration::from_secs(1),
            push_images: true,
            image_build_args: Vec::new(),
            container_backend_global_args: Vec::new(),
            container_run_args: Vec::new(),
            devstate_dir: String::from(DEFAULT_DEVSTATE_DIR),
            global_config: None,
        }
    }
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which resolves a variable name.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(cmd) = lookup("PODMAN_CMD").filter(|v| !v.is_empty()) {
            config.podman_cmd = cmd;
        }
        if let Some(cmd) = lookup("DOCKER_CMD").filter(|v| !v.is_empty()) {
            config.docker_cmd = cmd;
        }
        if let Some(timeout) = lookup("PODMAN_CMD_INIT_TIMEOUT") {
            config.podman_cmd_init_timeout =
                parse_duration(&timeout).ok_or_else(|| invalid("PODMAN_CMD_INIT_TIMEOUT", &timeout))?;
        }
        if let Some(push) = lookup("ASTRA_PUSH_IMAGES") {
            config.push_images = parse_bool(&push).ok_or_else(|| invalid("ASTRA_PUSH_IMAGES", &push))?;
        }
        if let Some(args) = lookup("ASTRA_IMAGE_BUILD_ARGS") {
            config.image_build_args = split_list(&args);
        }
        if let Some(args) = lookup("ASTRA_CONTAINER_BACKEND_GLOBAL_ARGS") {
            config.container_backend_global_args = split_list(&args);
        }
        if let Some(args) = lookup("ASTRA_CONTAINER_RUN_ARGS") {
            config.container_run_args = split_list(&args);
        }
        if let Some(dir) = lookup("ASTRA_DEVSTATE_DIR").filter(|v| !v.is_empty()) {
            config.devstate_dir = dir;
        }
        config.global_config = lookup("GLOBALASTRACONFIG").filter(|v| !v.is_empty());

        debug!("Environment configuration: {:?}", config);
        Ok(config)
    }
}

/// Loads `.env` from `dir` if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_dotenv(dir: &Path) -> Result<()> {
    let env_path = dir.join(".env");

    if env_path.exists() {
        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to load .env file: {e}"),
            location: env_path.display().to_string(),
        })?;
    } else {
        debug!(".env file not found at: {}", env_path.display());
    }

    Ok(())
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
