//! Image build and push.
//!
//! Images are built with the podman or docker binary. Podman is preferred
//! when it can be found on the `PATH`.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EnvConfig;
use crate::devfile::ImageComponent;
use crate::error::{AstraError, DevfileError, PlatformError, Result};

/// Image build backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Builds the image of `image`, resolving relative paths against `devfile_dir`.
    async fn build(&self, image: &ImageComponent, devfile_dir: &Path) -> Result<()>;

    /// Pushes `image` to its registry.
    async fn push(&self, image: &str) -> Result<()>;
}

/// Image backend driving a container engine binary.
#[derive(Debug, Clone)]
pub struct CliImageBackend {
    /// Engine binary.
    cmd: String,
    /// Arguments passed before every subcommand.
    global_args: Vec<String>,
    /// Extra arguments of `build`.
    build_args: Vec<String>,
    /// Upper bound of a push.
    push_timeout: Option<Duration>,
}

impl CliImageBackend {
    /// Creates a backend running `cmd`.
    #[must_use]
    pub fn new(cmd: impl Into<String>, config: &EnvConfig) -> Self {
        Self {
            cmd: cmd.into(),
            global_args: config.container_backend_global_args.clone(),
            build_args: config.image_build_args.clone(),
            push_timeout: None,
        }
    }

    /// Fails pushes that take longer than `timeout`.
    #[must_use]
    pub const fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = Some(timeout);
        self
    }

    /// Picks podman when available, docker otherwise.
    #[must_use]
    pub fn select(config: &EnvConfig) -> Self {
        let cmd = if which::which(&config.podman_cmd).is_ok() {
            &config.podman_cmd
        } else {
            &config.docker_cmd
        };
        debug!("Using {} to build images", cmd);
        Self::new(cmd.clone(), config)
    }

    /// Binary in use.
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Arguments of the `build` invocation for `image`.
    fn build_command_args(&self, image: &ImageComponent, devfile_dir: &Path) -> Result<Vec<String>> {
        let dockerfile = image.dockerfile.as_ref().ok_or_else(|| {
            DevfileError::validation(
                format!("image {:?} has no dockerfile; only dockerfile builds are supported", image.image_name),
                "dockerfile",
            )
        })?;

        let context = dockerfile
            .build_context
            .as_deref()
            .map_or_else(|| devfile_dir.to_path_buf(), |c| resolve(devfile_dir, c));

        let mut args = self.global_args.clone();
        args.push(String::from("build"));
        args.extend(self.build_args.iter().cloned());
        args.push(String::from("-t"));
        args.push(image.image_name.clone());
        args.push(String::from("-f"));
        args.push(resolve(devfile_dir, &dockerfile.uri).display().to_string());
        for arg in &dockerfile.args {
            args.push(String::from("--build-arg"));
            args.push(arg.clone());
        }
        args.push(context.display().to_string());
        Ok(args)
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        debug!("Running: {} {}", self.cmd, args.join(" "));
        let status = Command::new(&self.cmd)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| AstraError::internal(format!("unable to run {}: {e}", self.cmd)))?;
        if !status.success() {
            return Err(AstraError::internal(format!(
                "{} {} exited with {}",
                self.cmd,
                args.first().map_or("", String::as_str),
                status
            )));
        }
        Ok(())
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[async_trait]
impl ImageBackend for CliImageBackend {
    async fn build(&self, image: &ImageComponent, devfile_dir: &Path) -> Result<()> {
        let args = self.build_command_args(image, devfile_dir)?;
        self.run(&args).await
    }

    async fn push(&self, image: &str) -> Result<()> {
        let mut args = self.global_args.clone();
        args.push(String::from("push"));
        args.push(image.to_string());
        match self.push_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run(&args))
                .await
                .map_err(|_| PlatformError::Timeout {
                    operation: format!("{} push {image}", self.cmd),
                    seconds: timeout.as_secs(),
                })?,
            None => self.run(&args).await,
        }
    }
}

/// Builds `image`, then pushes it when `push` is set.
///
/// # Errors
///
/// Returns an error if the build or the push fails.
pub async fn build_push_specific_image(
    backend: &dyn ImageBackend,
    image: &ImageComponent,
    devfile_dir: &Path,
    push: bool,
) -> Result<()> {
    info!("Building image {}", image.image_name);
    backend.build(image, devfile_dir).await?;

    if push {
        info!("Pushing image {}", image.image_name);
        backend.push(&image.image_name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::Dockerfile;

    fn image() -> ImageComponent {
        ImageComponent {
            image_name: String::from("quay.io/me/api:dev"),
            auto_build: None,
            dockerfile: Some(Dockerfile {
                uri: String::from("docker/Dockerfile"),
                build_context: None,
                args: vec![String::from("VERSION=1")],
                root_required: None,
            }),
        }
    }

    #[test]
    fn test_build_command_args() {
        let config = EnvConfig {
            image_build_args: vec![String::from("--platform=linux/amd64")],
            ..EnvConfig::default()
        };
        let backend = CliImageBackend::new("podman", &config);
        let args = backend
            .build_command_args(&image(), Path::new("/src/api"))
            .expect("args");
        assert_eq!(
            args,
            vec![
                "build",
                "--platform=linux/amd64",
                "-t",
                "quay.io/me/api:dev",
                "-f",
                "/src/api/docker/Dockerfile",
                "--build-arg",
                "VERSION=1",
                "/src/api",
            ]
        );
    }

    #[test]
    fn test_build_without_dockerfile_is_rejected() {
        let backend = CliImageBackend::new("docker", &EnvConfig::default());
        let mut image = image();
        image.dockerfile = None;
        assert!(backend.build_command_args(&image, Path::new("/src")).is_err());
    }

    #[tokio::test]
    async fn test_build_push_skips_push_when_disabled() {
        let mut backend = MockImageBackend::new();
        backend.expect_build().times(1).returning(|_, _| Ok(()));
        backend.expect_push().never();

        build_push_specific_image(&backend, &image(), Path::new("/src"), false)
            .await
            .expect("build");
    }

    #[tokio::test]
    async fn test_build_push_pushes_built_image() {
        let mut backend = MockImageBackend::new();
        backend.expect_build().times(1).returning(|_, _| Ok(()));
        backend
            .expect_push()
            .withf(|image| image == "quay.io/me/api:dev")
            .times(1)
            .returning(|_| Ok(()));

        build_push_specific_image(&backend, &image(), Path::new("/src"), true)
            .await
            .expect("build and push");
    }

    #[tokio::test]
    async fn test_push_timeout() {
        let config = EnvConfig {
            container_backend_global_args: vec![String::from("-c"), String::from("sleep 5")],
            ..EnvConfig::default()
        };
        let backend = CliImageBackend::new("sh", &config).with_push_timeout(Duration::from_millis(100));
        let err = backend.push("quay.io/me/api:dev").await.expect_err("push should time out");
        assert!(matches!(err, AstraError::Platform(PlatformError::Timeout { .. })));
    }
}
