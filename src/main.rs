//! `cai`: per-workspace sandbox containers for AI coding agents.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod context;
mod engine;
mod env;
mod error;
mod git;
mod lookup;
mod naming;
mod options;
mod poll;
mod provision;
mod report;
mod resolve;
mod session;
mod shell;
mod ssh;
mod volume;

use options::{Mode, SessionCommandOptions};

#[derive(Parser)]
#[command(name = "cai")]
#[command(
    author,
    version,
    about = "Run AI coding agents in isolated per-workspace containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show what cai is doing
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent (or a command) in the workspace container
    Run {
        #[command(flatten)]
        session: SessionArgs,

        /// Keep the command running in the background and print its PID
        #[arg(short, long)]
        detached: bool,

        /// Command to run instead of the agent
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Open a login shell in the workspace container
    Shell {
        #[command(flatten)]
        session: SessionArgs,

        /// Recreate the container on a brand-new data volume
        #[arg(long)]
        reset: bool,
    },

    /// Run a command through a login shell in the workspace container
    Exec {
        #[command(flatten)]
        session: SessionArgs,

        /// Command to run
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
}

/// Flags shared by every session command.
#[derive(Args)]
struct SessionArgs {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Use the container with this name instead of the workspace's
    #[arg(long)]
    container: Option<String>,

    /// Data volume for agent state
    #[arg(long)]
    data_volume: Option<String>,

    /// Config file to use instead of the workspace's .containai/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Template the container is created from
    #[arg(long)]
    template: Option<String>,

    /// Image tag, overriding the channel
    #[arg(long)]
    image_tag: Option<String>,

    /// Image channel: stable or nightly
    #[arg(long)]
    channel: Option<String>,

    /// Memory limit for a new container (e.g. 4g)
    #[arg(long)]
    memory: Option<String>,

    /// CPU limit for a new container (e.g. 2)
    #[arg(long)]
    cpus: Option<String>,

    /// Remove and recreate the container
    #[arg(long)]
    fresh: bool,

    /// Fall back to the default Docker context when no isolation context exists
    #[arg(long)]
    force: bool,

    /// Print what would happen without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Forward an environment variable (KEY=VALUE, or KEY to copy the host's)
    #[arg(short, long = "env", value_name = "KEY[=VALUE]")]
    env: Vec<String>,
}

impl SessionArgs {
    fn into_options(self, mode: Mode) -> SessionCommandOptions {
        SessionCommandOptions {
            mode,
            workspace: self.workspace,
            container: self.container,
            data_volume: self.data_volume,
            config: self.config,
            template: self.template,
            image_tag: self.image_tag,
            channel: self.channel,
            memory: self.memory,
            cpus: self.cpus,
            fresh: self.fresh,
            force: self.force,
            dry_run: self.dry_run,
            env: self.env,
            ..Default::default()
        }
    }
}

impl Cli {
    fn into_options(self) -> SessionCommandOptions {
        let mut opts = match self.command {
            Commands::Run {
                session,
                detached,
                command,
            } => SessionCommandOptions {
                detached,
                command,
                ..session.into_options(Mode::Run)
            },
            Commands::Shell { session, reset } => SessionCommandOptions {
                reset,
                ..session.into_options(Mode::Shell)
            },
            Commands::Exec { session, command } => SessionCommandOptions {
                command,
                ..session.into_options(Mode::Exec)
            },
        };
        opts.quiet = self.quiet;
        opts.verbose = self.verbose;
        opts.debug = self.debug;
        opts
    }
}

#[tokio::main]
async fn main() {
    let opts = Cli::parse().into_options();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::new(opts.log_filter()))
        .init();

    let code = match commands::session::run(opts).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", report::error_line(&format!("{e:#}")));
            error::exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SessionCommandOptions {
        Cli::try_parse_from(args).unwrap().into_options()
    }

    #[test]
    fn test_run_flags() {
        let opts = parse(&[
            "cai", "run", "-w", "/tmp", "--data-volume", "vol", "-e", "A=1", "-e", "B", "-d",
            "--", "codex", "--yolo",
        ]);
        assert_eq!(opts.mode, Mode::Run);
        assert_eq!(opts.workspace, Some(PathBuf::from("/tmp")));
        assert_eq!(opts.data_volume.as_deref(), Some("vol"));
        assert_eq!(opts.env, vec!["A=1", "B"]);
        assert!(opts.detached);
        assert_eq!(opts.command, vec!["codex", "--yolo"]);
    }

    #[test]
    fn test_shell_reset_and_globals() {
        let opts = parse(&["cai", "-q", "shell", "--reset", "--force"]);
        assert_eq!(opts.mode, Mode::Shell);
        assert!(opts.reset && opts.force && opts.quiet);
        assert!(!opts.fresh);
    }

    #[test]
    fn test_exec_trailing_command() {
        let opts = parse(&["cai", "exec", "--container", "box", "ls", "-la"]);
        assert_eq!(opts.mode, Mode::Exec);
        assert_eq!(opts.container.as_deref(), Some("box"));
        assert_eq!(opts.command, vec!["ls", "-la"]);
    }

    #[test]
    fn test_reset_only_on_shell() {
        assert!(Cli::try_parse_from(["cai", "run", "--reset"]).is_err());
        assert!(Cli::try_parse_from(["cai", "exec", "--detached", "ls"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(parse(&["cai", "--debug", "shell"]).log_filter(), "cai=debug");
        assert_eq!(parse(&["cai", "shell", "-v"]).log_filter(), "cai=info");
        assert_eq!(parse(&["cai", "-q", "shell"]).log_filter(), "cai=error");
        assert_eq!(parse(&["cai", "shell"]).log_filter(), "cai=warn");
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
