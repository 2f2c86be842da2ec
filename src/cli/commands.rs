//! CLI command definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::state::Platform;

/// Astra - inner-loop development of Devfile components on Kubernetes and
/// Podman.
#[derive(Parser, Debug)]
#[command(name = "astra")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the devfile (defaults to the one in the current directory).
    #[arg(long, global = true, env = "ASTRA_DEVFILE")]
    pub devfile: Option<PathBuf>,

    /// Application the component belongs to.
    #[arg(long, global = true, env = "ASTRA_APP", default_value = "app")]
    pub app: String,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format of command results.
    #[arg(short, long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Format of log events.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the component in dev mode and keep it in sync with local files.
    Dev(DevArgs),

    /// Run a devfile command in the component started by `astra dev`.
    Run {
        /// Id of the command.
        command: String,

        /// Platform the component runs on.
        #[arg(long, env = "ASTRA_PLATFORM", default_value = "cluster")]
        platform: Platform,
    },

    /// Delete resources.
    Delete {
        /// What to delete.
        #[command(subcommand)]
        command: DeleteCommands,
    },

    /// Describe resources.
    Describe {
        /// What to describe.
        #[command(subcommand)]
        command: DescribeCommands,
    },

    /// Show the logs of the component containers.
    Logs {
        /// Follow log output.
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show from the end of each log.
        #[arg(long)]
        tail: Option<i64>,

        /// Platform the component runs on.
        #[arg(long, env = "ASTRA_PLATFORM", default_value = "cluster")]
        platform: Platform,
    },
}

/// Arguments of `astra dev`.
#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    /// Platform to run the component on.
    #[arg(long, env = "ASTRA_PLATFORM", default_value = "cluster")]
    pub platform: Platform,

    /// Run the debug command instead of the run command.
    #[arg(long)]
    pub debug: bool,

    /// Build command to run instead of the default one.
    #[arg(long)]
    pub build_command: Option<String>,

    /// Run command to run instead of the default one.
    #[arg(long)]
    pub run_command: Option<String>,

    /// Debug command to run instead of the default one.
    #[arg(long)]
    pub debug_command: Option<String>,

    /// Only sync files, do not run any command.
    #[arg(long)]
    pub no_commands: bool,

    /// Forward ports on random local ports.
    #[arg(long)]
    pub random_ports: bool,

    /// Do not watch local files; push only on request.
    #[arg(long)]
    pub no_watch: bool,

    /// Delay between a file change and the push it triggers (`100ms`, `1s`).
    #[arg(long, default_value = "100ms")]
    pub watch_delay: String,

    /// Devfile variable override, `NAME=VALUE`.
    #[arg(long = "var")]
    pub vars: Vec<String>,

    /// Explicit port mapping, `LOCAL:CONTAINER` or `CONTAINER_NAME:LOCAL:CONTAINER`.
    /// A bare `LOCAL` goes to the next endpoint no other mapping covers.
    #[arg(long = "port-forward")]
    pub port_forward: Vec<String>,

    /// Local address ports are forwarded on.
    #[arg(long)]
    pub address: Option<String>,

    /// Podman: redirect traffic to ports bound on the container loopback.
    #[arg(long, conflicts_with = "ignore_localhost")]
    pub forward_localhost: bool,

    /// Podman: do not fail on ports bound on the container loopback.
    #[arg(long)]
    pub ignore_localhost: bool,

    /// Start the local API server.
    #[arg(long, default_value_t = true, overrides_with = "no_api_server")]
    pub api_server: bool,

    /// Do not start the local API server.
    #[arg(long)]
    pub no_api_server: bool,

    /// Port of the local API server (defaults to the first free port from 20000).
    #[arg(long)]
    pub api_server_port: Option<u16>,
}

/// `astra delete` subcommands.
#[derive(Subcommand, Debug)]
pub enum DeleteCommands {
    /// Delete the resources of a component.
    Component {
        /// Component to delete, instead of the one of the devfile.
        #[arg(long)]
        name: Option<String>,

        /// Only delete resources running in this mode.
        #[arg(long)]
        running_in: Option<RunningIn>,

        /// Wait for the resources to be gone.
        #[arg(short, long)]
        wait: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        force: bool,

        /// Only delete on this platform.
        #[arg(long, env = "ASTRA_PLATFORM")]
        platform: Option<Platform>,
    },
}

/// `astra describe` subcommands.
#[derive(Subcommand, Debug)]
pub enum DescribeCommands {
    /// Describe the component of the devfile.
    Component {
        /// Only describe this platform.
        #[arg(long, env = "ASTRA_PLATFORM")]
        platform: Option<Platform>,
    },
}

/// Mode filter of `astra delete component`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunningIn {
    /// Resources created by `astra dev`.
    Dev,
    /// Resources created by `astra deploy`.
    Deploy,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log event formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl DevArgs {
    /// Whether the API server should run.
    #[must_use]
    pub const fn api_server_enabled(&self) -> bool {
        self.api_server && !self.no_api_server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_flags() {
        let cli = Cli::try_parse_from([
            "astra",
            "dev",
            "--platform",
            "podman",
            "--var",
            "PORT=8080",
            "--port-forward",
            "8080:3000",
            "--forward-localhost",
            "--no-api-server",
        ])
        .expect("parse");
        let Commands::Dev(args) = cli.command else {
            panic!("expected dev");
        };
        assert_eq!(args.platform, Platform::Podman);
        assert_eq!(args.vars, vec![String::from("PORT=8080")]);
        assert_eq!(args.port_forward, vec![String::from("8080:3000")]);
        assert!(args.forward_localhost);
        assert!(!args.api_server_enabled());
        assert_eq!(cli.app, "app");
    }

    #[test]
    fn test_localhost_flags_conflict() {
        assert!(Cli::try_parse_from(["astra", "dev", "--forward-localhost", "--ignore-localhost"]).is_err());
    }

    #[test]
    fn test_delete_component() {
        let cli = Cli::try_parse_from([
            "astra",
            "delete",
            "component",
            "--name",
            "api",
            "--running-in",
            "deploy",
            "-f",
            "--output",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Delete {
            command: DeleteCommands::Component {
                name, running_in, force, ..
            },
        } = cli.command
        else {
            panic!("expected delete component");
        };
        assert_eq!(name.as_deref(), Some("api"));
        assert_eq!(running_in, Some(RunningIn::Deploy));
        assert!(force);
    }
}
