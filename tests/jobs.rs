// tests/jobs.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use privrun::audit::NoAudit;
use privrun::errors::EngineError;
use privrun::exec::EXIT_TIMEOUT;
use privrun::jobs::{follow_job, JobManager, JobSnapshot, Subscription, JOB_AUDIT_ACTION};
use privrun::types::CommandSpec;
use privrun_test_utils::{init_tracing, sh, with_timeout, ConfigFileBuilder, RecordingAudit};

type TestResult = Result<(), Box<dyn Error>>;

fn manager() -> JobManager {
    JobManager::new(ConfigFileBuilder::new().build(), Arc::new(NoAudit))
}

async fn wait_done(manager: &JobManager, id: &str) -> JobSnapshot {
    loop {
        let snap = manager.get(id).expect("job should exist");
        if snap.done {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Snapshot output plus every chunk that arrived on `sub` until the job
/// finished.
async fn collect(manager: &JobManager, initial: JobSnapshot, mut sub: Subscription) -> Vec<u8> {
    let mut seen = initial.output;
    loop {
        tokio::select! {
            Some(chunk) = sub.recv() => seen.extend_from_slice(&chunk),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {
                if manager.get(&initial.id).expect("job should exist").done {
                    break;
                }
            }
        }
    }
    while let Some(chunk) = sub.try_recv() {
        seen.extend_from_slice(&chunk);
    }
    seen
}

#[tokio::test]
async fn start_returns_a_running_job_with_a_fresh_id() -> TestResult {
    init_tracing();
    let manager = manager();

    let a = manager.start("admin", sh("sleep 0.2"))?;
    let b = manager.start("admin", sh("sleep 0.2"))?;

    assert_ne!(a.id, b.id);
    assert!(a.id.starts_with("job-"));
    assert!(!a.done);
    assert_eq!(a.exit_code, None);
    assert_eq!(manager.len(), 2);
    assert_eq!(manager.list().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    init_tracing();
    let manager = manager();

    assert!(matches!(manager.get("job-nope"), Err(EngineError::JobNotFound(_))));
    assert!(matches!(manager.subscribe("job-nope"), Err(EngineError::JobNotFound(_))));
}

#[tokio::test]
async fn relative_paths_are_rejected_before_spawning() {
    init_tracing();
    let manager = manager();

    let res = manager.start("admin", CommandSpec::new("zfs list"));
    assert!(matches!(res, Err(EngineError::Validation(_))));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn allowlist_limits_what_can_start() {
    init_tracing();
    let cfg = ConfigFileBuilder::new().allow("/bin/echo").build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    assert!(manager.start("admin", CommandSpec::new("/bin/echo").arg("hi")).is_ok());
    let res = manager.start("admin", sh("true"));
    assert!(matches!(res, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn finished_job_reports_output_and_exit_code() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start("admin", sh("echo out; echo err >&2; exit 7"))?;
    let done = with_timeout(wait_done(&manager, &started.id)).await;

    assert_eq!(done.exit_code, Some(7));
    let text = done.output_text();
    assert!(text.contains("out\n"));
    assert!(text.contains("err\n"));
    assert!(!done.truncated);
    assert!(done.ended_at.is_some());
    assert!(done.duration().is_some());
    Ok(())
}

#[tokio::test]
async fn subscribers_see_the_same_ordered_stream() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start(
        "admin",
        sh("for i in 1 2 3 4 5; do echo line$i; sleep 0.1; done"),
    )?;

    let (snap_a, sub_a) = manager.attach(&started.id)?;
    let (snap_b, sub_b) = manager.attach(&started.id)?;

    let (seen_a, seen_b) = with_timeout(async {
        tokio::join!(
            collect(&manager, snap_a, sub_a),
            collect(&manager, snap_b, sub_b)
        )
    })
    .await;

    let expected = b"line1\nline2\nline3\nline4\nline5\n".to_vec();
    let last = manager.get(&started.id)?;
    assert_eq!(last.output, expected);
    assert_eq!(seen_a, expected);
    assert_eq!(seen_b, expected);
    Ok(())
}

#[tokio::test]
async fn polled_output_only_grows_as_a_prefix() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start(
        "admin",
        sh("for i in 1 2 3 4 5 6; do echo tick$i; sleep 0.05; done"),
    )?;

    let mut previous = Vec::new();
    let last = with_timeout(async {
        loop {
            let snap = manager.get(&started.id).expect("job should exist");
            assert!(
                snap.output.starts_with(&previous),
                "{:?} does not extend {:?}",
                snap.output,
                previous
            );
            previous = snap.output.clone();
            if snap.done {
                break snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert_eq!(last.exit_code, Some(0));
    assert!(last.output_text().ends_with("tick6\n"));
    Ok(())
}

#[tokio::test]
async fn output_is_capped_and_flagged() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().max_output_bytes(16).build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("head -c 1048576 /dev/zero | tr '\\0' 'x'"))?;
    let done = with_timeout(wait_done(&manager, &started.id)).await;

    assert_eq!(done.output_text(), "x".repeat(16));
    assert!(done.truncated);
    assert_eq!(done.exit_code, Some(0));
    Ok(())
}

#[tokio::test]
async fn overrunning_job_ends_with_124() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().max_runtime_seconds(1).build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("echo begin; sleep 30"))?;
    let done = with_timeout(wait_done(&manager, &started.id)).await;

    assert_eq!(done.exit_code, Some(EXIT_TIMEOUT));
    assert!(done.output_text().starts_with("begin\n"));
    Ok(())
}

#[tokio::test]
async fn start_failure_becomes_a_finished_job() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start("admin", CommandSpec::new("/nonexistent/privrun-tool"))?;
    let done = with_timeout(wait_done(&manager, &started.id)).await;

    assert_eq!(done.exit_code, Some(1));
    assert!(done.output_text().contains("/nonexistent/privrun-tool"));
    Ok(())
}

#[tokio::test]
async fn each_job_is_audited_once_on_completion() -> TestResult {
    init_tracing();
    let audit = RecordingAudit::new();
    let manager = JobManager::new(ConfigFileBuilder::new().build(), Arc::new(audit.clone()));

    let started = manager.start("operator", sh("exit 4"))?;
    with_timeout(wait_done(&manager, &started.id)).await;
    let events = with_timeout(audit.wait_for(1)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(audit.len(), 1);
    assert_eq!(events[0].user, "operator");
    assert_eq!(events[0].action, JOB_AUDIT_ACTION);
    assert_eq!(events[0].command, "/bin/sh -c exit 4");
    assert_eq!(events[0].exit_code, 4);
    Ok(())
}

#[tokio::test]
async fn finished_jobs_are_evicted_after_retention() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .retention_seconds(1)
        .sweep_interval_seconds(60)
        .build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("echo bye"))?;
    let done = with_timeout(wait_done(&manager, &started.id)).await;

    // Still within retention: unchanged.
    assert_eq!(manager.sweep(), 0);
    assert_eq!(manager.get(&started.id)?, done);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(manager.sweep(), 1);
    assert!(matches!(manager.get(&started.id), Err(EngineError::JobNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn periodic_sweep_evicts_without_being_asked() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .retention_seconds(0)
        .sweep_interval_seconds(1)
        .build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("true"))?;
    with_timeout(wait_done(&manager, &started.id)).await;

    with_timeout(async {
        while manager.get(&started.id).is_ok() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn running_jobs_are_never_evicted() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().retention_seconds(0).build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("sleep 1"))?;
    assert_eq!(manager.sweep(), 0);
    assert!(manager.get(&started.id).is_ok());
    Ok(())
}

#[tokio::test]
async fn config_updates_leave_running_jobs_alone() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new().max_output_bytes(1024).build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("sleep 0.2; printf '%s' 0123456789"))?;
    manager.update_config(ConfigFileBuilder::new().max_output_bytes(4).build());
    assert_eq!(manager.config_snapshot().limits.max_output_bytes, 4);

    let done = with_timeout(wait_done(&manager, &started.id)).await;
    assert_eq!(done.output_text(), "0123456789");
    assert!(!done.truncated);

    let next = manager.start("admin", sh("printf '%s' 0123456789"))?;
    let next = with_timeout(wait_done(&manager, &next.id)).await;
    assert_eq!(next.output_text(), "0123");
    assert!(next.truncated);
    Ok(())
}

#[tokio::test]
async fn dropping_a_subscription_does_not_stop_the_job() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start("admin", sh("sleep 0.2; echo still here"))?;
    let sub = manager.subscribe(&started.id)?;
    manager.unsubscribe(&started.id, sub);

    let done = with_timeout(wait_done(&manager, &started.id)).await;
    assert_eq!(done.exit_code, Some(0));
    assert_eq!(done.output_text(), "still here\n");
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_running_jobs() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start("admin", sh("exec sleep 30"))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.shutdown();

    let done = with_timeout(wait_done(&manager, &started.id)).await;
    assert_eq!(done.exit_code, Some(1));
    Ok(())
}

#[tokio::test]
async fn follow_job_writes_everything_and_returns_the_final_state() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start(
        "admin",
        sh("echo one; sleep 0.1; echo two; sleep 0.1; echo three; exit 2"),
    )?;

    let mut sink: Vec<u8> = Vec::new();
    let last = with_timeout(follow_job(
        &manager,
        &started.id,
        &mut sink,
        Duration::from_millis(50),
    ))
    .await?;

    assert!(last.done);
    assert_eq!(last.exit_code, Some(2));
    assert_eq!(String::from_utf8(sink)?, "one\ntwo\nthree\n");
    Ok(())
}

#[tokio::test]
async fn character_split_across_writes_keeps_snapshots_prefix_stable() -> TestResult {
    init_tracing();
    let manager = manager();

    // U+00E9 is \303\251; the two bytes arrive half a second apart.
    let started = manager.start("admin", sh("printf '\\303'; sleep 0.5; printf '\\251'"))?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    let mid = manager.get(&started.id)?;
    assert!(!mid.done);

    let last = with_timeout(wait_done(&manager, &started.id)).await;
    assert_eq!(last.exit_code, Some(0));
    assert_eq!(last.output, "\u{e9}".as_bytes());
    assert!(last.output.starts_with(&mid.output));
    assert_eq!(last.output_text(), "\u{e9}");
    assert!(last.output_text().starts_with(&mid.output_text()));
    Ok(())
}

#[tokio::test]
async fn follow_job_passes_split_characters_through_untouched() -> TestResult {
    init_tracing();
    let manager = manager();

    let started = manager.start("admin", sh("printf '\\303'; sleep 0.3; printf '\\251'"))?;
    // Attach while only the first byte is buffered.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut sink: Vec<u8> = Vec::new();
    let last = with_timeout(follow_job(
        &manager,
        &started.id,
        &mut sink,
        Duration::from_millis(50),
    ))
    .await?;

    assert_eq!(last.exit_code, Some(0));
    assert_eq!(sink, "\u{e9}".as_bytes());
    Ok(())
}

#[tokio::test]
async fn follow_job_survives_eviction_of_the_finished_job() -> TestResult {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .retention_seconds(0)
        .sweep_interval_seconds(60)
        .build();
    let manager = JobManager::new(cfg, Arc::new(NoAudit));

    let started = manager.start("admin", sh("sleep 0.3; echo done"))?;

    let sweeper = async {
        while manager.get(&started.id).is_ok() {
            manager.sweep();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    let mut sink: Vec<u8> = Vec::new();
    let (followed, ()) = with_timeout(async {
        tokio::join!(
            follow_job(&manager, &started.id, &mut sink, Duration::from_secs(1)),
            sweeper
        )
    })
    .await;

    let last = followed?;
    assert!(last.done);
    assert_eq!(last.exit_code, Some(0));
    assert_eq!(last.output_text(), "done\n");
    assert_eq!(sink, b"done\n");
    assert!(matches!(
        manager.get(&started.id),
        Err(EngineError::JobNotFound(_))
    ));
    Ok(())
}
