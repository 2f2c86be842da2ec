//! User preferences from `~/.astra/preference.yaml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AstraError, ConfigError, Result};

use super::parse_duration;

/// Preference file name under `~/.astra`.
pub const PREFERENCE_FILE: &str = "preference.yaml";

/// Cluster reachability timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Image push timeout.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(240);

/// Devfile registry cache lifetime.
pub const DEFAULT_REGISTRY_CACHE_TIME: Duration = Duration::from_secs(4 * 60);

/// On-disk layout of the preference file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferenceFile {
    #[serde(default)]
    astra_settings: Settings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Settings {
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    push_timeout: Option<String>,
    #[serde(default)]
    registry_cache_time: Option<String>,
    #[serde(default)]
    ephemeral: Option<bool>,
    #[serde(default)]
    image_registry: Option<String>,
}

/// Resolved user preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Cluster reachability timeout.
    pub timeout: Duration,
    /// Image push timeout.
    pub push_timeout: Duration,
    /// Devfile registry cache lifetime.
    pub registry_cache_time: Duration,
    /// Whether the source volume is an `emptyDir`.
    pub ephemeral: bool,
    /// Registry used to rewrite relative image names.
    pub image_registry: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            registry_cache_time: DEFAULT_REGISTRY_CACHE_TIME,
            ephemeral: false,
            image_registry: None,
        }
    }
}

impl Preferences {
    /// Default preference file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".astra").join(PREFERENCE_FILE))
    }

    /// Loads preferences from `path`, or the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => {
                    debug!("No home directory, using default preferences");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!("Preference file not found at: {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content, &path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let location = path.display().to_string();
        let file: PreferenceFile = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
            location: location.clone(),
        })?;
        let settings = file.astra_settings;

        let duration = |value: Option<String>, name: &str, default: Duration| -> Result<Duration> {
            value.map_or(Ok(default), |v| {
                parse_duration(&v).ok_or_else(|| {
                    AstraError::from(ConfigError::InvalidValue {
                        name: name.to_string(),
                        value: v.clone(),
                    })
                })
            })
        };

        Ok(Self {
            timeout: duration(settings.timeout, "Timeout", DEFAULT_TIMEOUT)?,
            push_timeout: duration(settings.push_timeout, "PushTimeout", DEFAULT_PUSH_TIMEOUT)?,
            registry_cache_time: duration(
                settings.registry_cache_time,
                "RegistryCacheTime",
                DEFAULT_REGISTRY_CACHE_TIME,
            )?,
            ephemeral: settings.ephemeral.unwrap_or(false),
            image_registry: settings.image_registry.filter(|r| !r.is_empty()),
        })
    }
}
