// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The binary is an operator tool over the engine: every subcommand maps
//! onto one engine operation and exits with the command's exit code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `privrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "privrun",
    version,
    about = "Run privileged commands with output caps, deadlines and audit.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `privrun.toml` in the current working directory. A missing
    /// file means built-in defaults.
    #[arg(long, global = true, value_name = "PATH", default_value = "privrun.toml")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PRIVRUN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Name recorded in the audit log.
    #[arg(long, global = true, value_name = "NAME", default_value = "cli")]
    pub owner: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one command to completion and print its output.
    Run(RunArgs),

    /// Start a background job and follow its output until it finishes.
    Job(JobArgs),

    /// Pipe one command's stdout into another's stdin.
    Pipe(PipeArgs),

    /// Decide between a full and an incremental transfer.
    Chain(ChainArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Absolute path of the program.
    pub path: String,

    /// Arguments passed verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Feed this file to the command's stdin.
    #[arg(long, value_name = "FILE")]
    pub stdin_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    /// Absolute path of the program.
    pub path: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Poll interval of the viewer, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct PipeArgs {
    /// Producer command line, e.g. "/sbin/zfs send tank@a".
    #[arg(long, value_name = "CMDLINE")]
    pub producer: String,

    /// Consumer command line, e.g. "/sbin/zfs recv backup".
    #[arg(long, value_name = "CMDLINE")]
    pub consumer: String,
}

#[derive(Debug, Clone, Args)]
pub struct ChainArgs {
    /// Only names whose `@suffix` starts with this prefix take part.
    #[arg(long)]
    pub prefix: String,

    /// The checkpoint that was just created.
    #[arg(long, value_name = "NAME")]
    pub just_created: String,

    /// Also print the `recv` arguments for this target.
    #[arg(long, value_name = "DATASET")]
    pub target: Option<String>,

    #[arg(long)]
    pub recursive: bool,

    #[arg(long)]
    pub force: bool,

    /// Existing checkpoint names, oldest first.
    pub names: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_keeps_hyphenated_args() {
        let args = CliArgs::try_parse_from(["privrun", "run", "/sbin/zfs", "list", "-H", "-o", "name"])
            .unwrap();
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.path, "/sbin/zfs");
                assert_eq!(run.args, vec!["list", "-H", "-o", "name"]);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "privrun",
            "chain",
            "--prefix",
            "repl",
            "--just-created",
            "tank@repl-2",
            "--log-level",
            "debug",
            "tank@repl-1",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Chain(chain) => assert_eq!(chain.names, vec!["tank@repl-1"]),
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }
}
