// src/jobs/manager.rs

//! The job table: starting, looking up, subscribing to and evicting jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{record_blocking, AuditEvent, AuditSink};
use crate::config::ConfigFile;
use crate::errors::{EngineError, Result};
use crate::exec::command::{drain_until, kill, wait_until, DRAIN_GRACE};
use crate::exec::{Elevation, EXIT_FAILURE};
use crate::types::{CommandSpec, ResourceLimits};

use super::job::{Job, JobId, JobSnapshot, Subscription};

/// Audit action recorded for every finished job.
pub const JOB_AUDIT_ACTION: &str = "cmd.run";

/// Owns every job started through it.
///
/// Cloning is cheap and every clone sees the same table. Construction
/// spawns the periodic eviction sweep, so it must happen inside a Tokio
/// runtime; the sweep stops when the last clone is dropped or on
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<ConfigFile>,
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
    audit: Arc<dyn AuditSink>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &self.inner.table().len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> ConfigFile {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lookup(&self, id: &str) -> Result<Arc<Job>> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))
    }

    fn sweep(&self) -> usize {
        let retention = self.config().jobs.retention();
        let now = Instant::now();
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, job| !job.is_expired(now, retention));
        before - table.len()
    }
}

impl JobManager {
    pub fn new(config: ConfigFile, audit: Arc<dyn AuditSink>) -> Self {
        let sweep_interval = config.jobs.sweep_interval();
        let inner = Arc::new(Inner {
            config: RwLock::new(config),
            jobs: Mutex::new(HashMap::new()),
            audit,
            sweeper: Mutex::new(None),
        });

        let handle = tokio::spawn(sweep_loop(Arc::downgrade(&inner), sweep_interval));
        *inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    /// Swap the live configuration. Jobs already running keep the limits
    /// and wrapper they started with.
    pub fn update_config(&self, config: ConfigFile) {
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        info!("job configuration updated");
    }

    pub fn config_snapshot(&self) -> ConfigFile {
        self.inner.config()
    }

    /// Validate `spec`, register a new running job and start it on its own
    /// task. Returns as soon as the job is registered.
    ///
    /// The job is not tied to the caller: dropping whatever request led
    /// here does not stop it. Only its deadline (or [`shutdown`](Self::shutdown))
    /// does.
    pub fn start(&self, owner: &str, spec: CommandSpec) -> Result<JobSnapshot> {
        spec.validate()?;
        let cfg = self.inner.config();
        cfg.check_allowed(&spec.absolute_path)?;

        let id = new_job_id();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let job = Arc::new(Job::new(
            id.clone(),
            &spec,
            owner,
            cfg.limits.output_limit(),
            cancel_tx,
        ));
        self.inner.table().insert(id.clone(), Arc::clone(&job));
        let snapshot = job.snapshot();

        info!(job_id = %id, owner, cmd = %spec.canonical(), "job started");

        tokio::spawn(run_job(
            job,
            spec,
            cfg.elevation,
            cfg.limits,
            Arc::clone(&self.inner.audit),
            cancel_rx,
        ));

        Ok(snapshot)
    }

    pub fn get(&self, id: &str) -> Result<JobSnapshot> {
        Ok(self.inner.lookup(id)?.snapshot())
    }

    /// Snapshots of every job in the table, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<Job>> = self.inner.table().values().cloned().collect();
        let mut snaps: Vec<JobSnapshot> = jobs.iter().map(|j| j.snapshot()).collect();
        snaps.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        snaps
    }

    /// Register a live feed for `id`. Works for finished jobs too; such a
    /// feed simply never yields.
    pub fn subscribe(&self, id: &str) -> Result<Subscription> {
        Ok(self.attach(id)?.1)
    }

    /// Snapshot plus a feed of everything produced after it.
    pub fn attach(&self, id: &str) -> Result<(JobSnapshot, Subscription)> {
        let job = self.inner.lookup(id)?;
        Ok(self.attach_job(&job))
    }

    /// The job record itself. It stays usable after a sweep evicts it from
    /// the table.
    pub(crate) fn job(&self, id: &str) -> Result<Arc<Job>> {
        self.inner.lookup(id)
    }

    pub(crate) fn attach_job(&self, job: &Arc<Job>) -> (JobSnapshot, Subscription) {
        let capacity = self.inner.config().jobs.subscriber_capacity;
        job.attach(capacity)
    }

    /// Deregister and close `sub`.
    pub fn unsubscribe(&self, id: &str, sub: Subscription) {
        if sub.job_id() != id {
            warn!(job_id = id, subscription_job = sub.job_id(), "unsubscribe for a different job");
        }
        drop(sub);
    }

    /// Evict finished jobs older than the retention window. Returns how
    /// many were removed.
    pub fn sweep(&self) -> usize {
        let evicted = self.inner.sweep();
        if evicted > 0 {
            debug!(evicted, "evicted finished jobs");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the sweep and cancel every running job. Cancelled jobs finish
    /// with exit code 1.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let jobs: Vec<Arc<Job>> = self.inner.table().values().cloned().collect();
        let cancelled = jobs.iter().filter(|job| job.cancel()).count();
        info!(cancelled, "job manager shut down");
    }
}

fn new_job_id() -> JobId {
    format!("job-{}", uuid::Uuid::new_v4().simple())
}

async fn sweep_loop(inner: Weak<Inner>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let evicted = inner.sweep();
        if evicted > 0 {
            debug!(evicted, "periodic sweep evicted finished jobs");
        }
    }
}

/// Body of one job: spawn, drain both streams into the job, wait, finish,
/// audit.
async fn run_job(
    job: Arc<Job>,
    spec: CommandSpec,
    elevation: Elevation,
    limits: ResourceLimits,
    audit: Arc<dyn AuditSink>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let deadline = tokio::time::Instant::now() + limits.runtime();

    let exit_code = match elevation.spawn(&spec) {
        Err(e) => {
            warn!(job_id = job.id(), error = %e, "job failed to start");
            job.fail_to_start(&e.to_string());
            EXIT_FAILURE
        }
        Ok(mut child) => match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => {
                let drains_until = deadline + DRAIN_GRACE;
                let wait = async {
                    tokio::select! {
                        outcome = wait_until(&mut child, deadline) => outcome.exit_code(),
                        Ok(()) = cancel_rx => {
                            info!(job_id = job.id(), "job cancelled; killing process");
                            kill(&mut child).await;
                            EXIT_FAILURE
                        }
                    }
                };
                let (code, (), ()) = tokio::join!(
                    wait,
                    drain_until(stdout, drains_until, |chunk| job.append(chunk)),
                    drain_until(stderr, drains_until, |chunk| job.append(chunk)),
                );
                job.finish(code);
                code
            }
            _ => {
                kill(&mut child).await;
                let err = EngineError::Pipe("stdout/stderr");
                warn!(job_id = job.id(), error = %err, "job failed to start");
                job.fail_to_start(&err.to_string());
                EXIT_FAILURE
            }
        },
    };

    let snap = job.snapshot();
    info!(
        job_id = job.id(),
        exit_code,
        truncated = snap.truncated,
        "job finished"
    );
    let event = AuditEvent::new(job.owner(), JOB_AUDIT_ACTION, job.command_line(), exit_code);
    record_blocking(audit, event).await;
}
