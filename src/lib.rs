// src/lib.rs

pub mod audit;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod jobs;
pub mod logging;
pub mod replicate;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::audit::{record_blocking, AuditEvent, AuditSink};
use crate::cli::{ChainArgs, CliArgs, Command, JobArgs, PipeArgs, RunArgs};
use crate::config::{ConfigFile, load_or_default};
use crate::exec::{CommandRunner, EXIT_FAILURE, PipelineExecutor};
use crate::jobs::{JobManager, follow_job};
use crate::replicate::{matching_checkpoints, select_after_prior, valid_checkpoint_token};
use crate::types::{CommandSpec, ExecutionResult};

/// Audit action for a synchronous run started from the CLI.
pub const RUN_AUDIT_ACTION: &str = "cmd.run";
/// Audit action for a pipeline started from the CLI.
pub const PIPE_AUDIT_ACTION: &str = "cmd.pipe";

/// High-level entry point used by `main.rs`.
///
/// Loads the configuration, builds the audit sink and dispatches the
/// subcommand. Returns the exit code the process should end with.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    debug!(config = %args.config.display(), ?cfg, "configuration loaded");

    let audit = cfg.audit.build_sink();

    match args.command {
        Command::Run(run) => run_command(&cfg, audit, &args.owner, run).await,
        Command::Job(job) => follow_new_job(cfg, audit, &args.owner, job).await,
        Command::Pipe(pipe) => run_pipe(&cfg, audit, &args.owner, pipe).await,
        Command::Chain(chain) => print_chain(chain),
    }
}

async fn run_command(
    cfg: &ConfigFile,
    audit: Arc<dyn AuditSink>,
    owner: &str,
    run: RunArgs,
) -> Result<i32> {
    let mut spec = CommandSpec::new(run.path).args(run.args);
    if let Some(path) = run.stdin_file {
        let input = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading stdin file {}", path.display()))?;
        spec = spec.stdin(input);
    }
    spec.validate()?;
    cfg.check_allowed(&spec.absolute_path)?;

    let runner = CommandRunner::new(cfg.elevation.clone(), audit);
    let res = runner
        .run_as(owner, RUN_AUDIT_ACTION, &spec, cfg.limits)
        .await
        .unwrap_or_else(|err| ExecutionResult::start_failure(&err));

    print_result(&res);
    Ok(res.exit_code)
}

async fn follow_new_job(
    cfg: ConfigFile,
    audit: Arc<dyn AuditSink>,
    owner: &str,
    job: JobArgs,
) -> Result<i32> {
    let spec = CommandSpec::new(job.path).args(job.args);
    let manager = JobManager::new(cfg, audit);

    let started = manager.start(owner, spec)?;
    info!(job_id = %started.id, cmd = %started.command_line(), "job started");

    let mut stdout = tokio::io::stdout();
    let outcome = follow_job(
        &manager,
        &started.id,
        &mut stdout,
        Duration::from_millis(job.poll_ms.max(1)),
    )
    .await;
    manager.shutdown();

    let last = outcome?;
    if last.truncated {
        warn!(job_id = %last.id, "job output was truncated");
    }
    Ok(last.exit_code.unwrap_or(EXIT_FAILURE))
}

async fn run_pipe(
    cfg: &ConfigFile,
    audit: Arc<dyn AuditSink>,
    owner: &str,
    pipe: PipeArgs,
) -> Result<i32> {
    let producer = parse_command_line(&pipe.producer)?;
    let consumer = parse_command_line(&pipe.consumer)?;
    for spec in [&producer, &consumer] {
        spec.validate()?;
        cfg.check_allowed(&spec.absolute_path)?;
    }

    let executor = PipelineExecutor::new(cfg.elevation.clone());
    let res = executor
        .run_pipeline(&producer, &consumer, cfg.limits)
        .await
        .unwrap_or_else(|err| ExecutionResult::start_failure(&err));

    let command = format!("{} | {}", producer.canonical(), consumer.canonical());
    let event = AuditEvent::new(owner, PIPE_AUDIT_ACTION, command, res.exit_code);
    record_blocking(audit, event).await;

    print_result(&res);
    Ok(res.exit_code)
}

fn print_chain(chain: ChainArgs) -> Result<i32> {
    if !valid_checkpoint_token(&chain.prefix) {
        bail!("invalid checkpoint prefix '{}'", chain.prefix);
    }

    let matching = matching_checkpoints(&chain.names, &chain.prefix);
    let selection = select_after_prior(&matching, &chain.just_created)?;

    println!("current: {}", selection.current);
    match &selection.previous {
        Some(prev) => println!("previous: {prev}"),
        None => println!("previous: -"),
    }
    println!(
        "mode: {}",
        if selection.incremental { "incremental" } else { "full" }
    );
    println!("send: {}", selection.send_args(chain.recursive).join(" "));
    if let Some(target) = &chain.target {
        println!("recv: {}", selection.receive_args(target, chain.force).join(" "));
    }
    Ok(0)
}

/// Split a command line on whitespace. No quoting is supported; the first
/// word must be an absolute path.
fn parse_command_line(line: &str) -> Result<CommandSpec> {
    let mut words = line.split_whitespace();
    let Some(program) = words.next() else {
        bail!("empty command line");
    };
    Ok(CommandSpec::new(program).args(words))
}

fn print_result(res: &ExecutionResult) {
    print!("{}", res.stdout);
    eprint!("{}", res.stderr);
    if res.truncated {
        warn!(exit_code = res.exit_code, "output was truncated");
    }
}
