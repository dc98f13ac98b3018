//! Run orchestrator
//!
//! Fans a run out over its tables with bounded concurrency, isolates failures
//! so one table can never abort another, and aggregates the outcomes into a
//! [`RunReport`]. With a [`RunLock`] configured, a run that finds the lock
//! held starts no table at all.

use crate::core::pipeline::cancel::Cancellation;
use crate::core::pipeline::lock::{LockAttempt, LockHolder, RunLock};
use crate::core::pipeline::report::{RunOutcome, RunReport};
use crate::core::pipeline::runner::{RunContext, TableRunner, TableState};
use crate::domain::table::TableSpec;
use crate::domain::SluiceError;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Default number of tables processed at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

pub struct Orchestrator {
    ctx: Arc<RunContext>,
    max_concurrency: usize,
    run_timeout: Option<Duration>,
    table_filter: Option<HashSet<String>>,
    run_lock: Option<RunLock>,
    shutdown: Cancellation,
}

impl Orchestrator {
    pub fn new(ctx: RunContext, shutdown: Cancellation) -> Self {
        Self {
            ctx: Arc::new(ctx),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            run_timeout: None,
            table_filter: None,
            run_lock: None,
            shutdown,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Cancel the run once `timeout` has elapsed
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Process only the named tables; the others are reported as skipped
    pub fn with_table_filter<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table_filter = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Hold `lock` for the duration of every non-dry run
    pub fn with_run_lock(mut self, lock: RunLock) -> Self {
        self.run_lock = Some(lock);
        self
    }

    /// Run every table and report
    ///
    /// Tables start in configuration order. Once the run is cancelled no
    /// further table starts; those tables are reported as skipped, while
    /// in-flight tables fail with [`SluiceError::Cancelled`]. The run lock is
    /// released after every table finished, whatever the outcome.
    pub async fn run(&self, tables: Vec<TableSpec>) -> RunReport {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id, Utc::now(), self.ctx.dry_run);
        let force = self.ctx.params.force_full_load;

        let lock = self.run_lock.as_ref().filter(|_| !self.ctx.dry_run);
        let holder = match lock {
            Some(lock) => match lock.acquire(run_id).await {
                Ok(LockAttempt::Granted(holder)) => Some(holder),
                Ok(LockAttempt::HeldBy(current)) => {
                    let err = SluiceError::RunLocked(match current {
                        Some(holder) => format!("{} is held by {holder}", lock.path()),
                        None => format!("{} is held by an unknown run", lock.path()),
                    });
                    tracing::error!(
                        run_id = %run_id,
                        kind = %err.kind(),
                        error = %err,
                        "Another run holds the run lock, no table started"
                    );
                    report.outcomes = tables
                        .into_iter()
                        .map(|t| {
                            let load_type = t.load_type(force);
                            RunOutcome::skipped(t.name, load_type, err.to_string())
                        })
                        .collect();
                    report.lock_conflict = Some(err.to_string());
                    return finish(report);
                }
                Err(err) => {
                    tracing::error!(run_id = %run_id, error = %err, "Failed to acquire run lock");
                    report.outcomes = tables
                        .into_iter()
                        .map(|t| {
                            let load_type = t.load_type(force);
                            RunOutcome::failed(t.name, load_type, &err, TableState::Pending)
                        })
                        .collect();
                    return finish(report);
                }
            },
            None => None,
        };

        let (outcomes, cancelled) = self.run_tables(run_id, tables).await;
        report.outcomes = outcomes;
        report.cancelled = cancelled;

        if let (Some(lock), Some(holder)) = (lock, holder) {
            release(lock, &holder).await;
        }
        finish(report)
    }

    async fn run_tables(&self, run_id: Uuid, tables: Vec<TableSpec>) -> (Vec<RunOutcome>, bool) {
        tracing::info!(
            run_id = %run_id,
            tables = tables.len(),
            max_concurrency = self.max_concurrency,
            force_full_load = self.ctx.params.force_full_load,
            dry_run = self.ctx.dry_run,
            "Starting run"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Cancellation::new(cancel_rx);
        let watchdog = tokio::spawn(watch_for_cancellation(
            self.shutdown.clone(),
            self.run_timeout,
            cancel_tx,
        ));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<(usize, RunOutcome)> = JoinSet::new();
        let mut slots: Vec<Option<RunOutcome>> = vec![None; tables.len()];
        let mut seen = HashSet::new();
        let names: Vec<_> = tables
            .iter()
            .map(|t| (t.name.clone(), t.load_type(self.ctx.params.force_full_load)))
            .collect();

        for (index, spec) in tables.into_iter().enumerate() {
            let load_type = spec.load_type(self.ctx.params.force_full_load);

            if let Some(filter) = &self.table_filter {
                if !filter.contains(spec.name.as_str()) {
                    slots[index] = Some(RunOutcome::skipped(spec.name, load_type, "not selected"));
                    continue;
                }
            }

            // One runner per table and run, so no checkpoint key has two writers
            if !seen.insert(spec.name.clone()) {
                let err = SluiceError::ConfigValidation(format!(
                    "table '{}' is listed more than once",
                    spec.name
                ));
                slots[index] = Some(RunOutcome::failed(
                    spec.name,
                    load_type,
                    &err,
                    TableState::Pending,
                ));
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                slots[index] = Some(RunOutcome::skipped(spec.name, load_type, "run cancelled"));
                continue;
            };
            if cancel.is_cancelled() {
                slots[index] = Some(RunOutcome::skipped(spec.name, load_type, "run cancelled"));
                continue;
            }

            let runner = TableRunner::new(spec, self.ctx.clone(), cancel.clone());
            join_set.spawn(async move {
                let _permit = permit;
                (index, runner.run().await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Table runner task aborted");
                }
            }
        }

        watchdog.abort();

        let outcomes = slots
            .into_iter()
            .zip(names)
            .map(|(slot, (name, load_type))| {
                slot.unwrap_or_else(|| {
                    let err = SluiceError::Other("table runner task aborted".to_string());
                    RunOutcome::failed(name, load_type, &err, TableState::Pending)
                })
            })
            .collect();
        (outcomes, cancel.is_cancelled())
    }
}

fn finish(mut report: RunReport) -> RunReport {
    report.finished_at = Utc::now();
    report.log_summary();
    report
}

async fn release(lock: &RunLock, holder: &LockHolder) {
    match lock.release(holder).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            run_id = %holder.run_id,
            lock = %lock.path(),
            "Run lock was no longer held by this run"
        ),
        Err(e) => tracing::error!(
            run_id = %holder.run_id,
            lock = %lock.path(),
            error = %e,
            "Failed to release run lock; remove it with `sluice run --force-unlock`"
        ),
    }
}

/// Flip the run's cancellation channel on shutdown or timeout
async fn watch_for_cancellation(
    shutdown: Cancellation,
    run_timeout: Option<Duration>,
    cancel_tx: watch::Sender<bool>,
) {
    let timeout = async {
        match run_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::warn!("Shutdown requested, cancelling run");
        }
        _ = timeout => {
            tracing::warn!(
                timeout_secs = run_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                "Run timeout reached, cancelling run"
            );
        }
    }

    let _ = cancel_tx.send(true);
}
