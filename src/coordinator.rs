//! Run coordinator.
//!
//! Splits the requested transactions across workers, runs one OS thread
//! per worker, and collects exactly one result from each over a channel.
//! Workers share nothing but the sending half of that channel.

use crate::config::Config;
use crate::report::RunSummary;
use crate::worker::{self, Target, WorkerError, WorkerResult, WorkerTask};
use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Split `total` transactions over `workers`.
///
/// Floor division by default: the issued count is
/// `workers * (total / workers)` and the remainder is dropped. With
/// `distribute_remainder`, the first `total % workers` workers get one
/// extra transaction each.
pub fn partition(total: usize, workers: usize, distribute_remainder: bool) -> Vec<WorkerTask> {
    if workers == 0 {
        return Vec::new();
    }

    let per_worker = total / workers;
    let remainder = total % workers;

    (0..workers)
        .map(|worker_id| WorkerTask {
            worker_id,
            transaction_count: if distribute_remainder && worker_id < remainder {
                per_worker + 1
            } else {
                per_worker
            },
        })
        .collect()
}

/// Raw results of a run, before aggregation
#[derive(Debug)]
pub struct Outcome {
    /// One entry per task, ordered by worker id
    pub results: Vec<WorkerResult>,
    pub total_elapsed: Duration,
}

/// Errors that stop a run before workers can report
#[derive(Debug)]
pub enum RunError {
    Resolve(String, io::Error),
    Spawn(io::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Resolve(target, e) => write!(f, "Failed to resolve '{target}': {e}"),
            RunError::Spawn(e) => write!(f, "Failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for RunError {}

/// Resolve `host:port`, preferring IPv4 like most local servers bind
pub fn resolve(target: &str) -> Result<SocketAddr, RunError> {
    let addrs: Vec<SocketAddr> = target
        .to_socket_addrs()
        .map_err(|e| RunError::Resolve(target.to_string(), e))?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            RunError::Resolve(
                target.to_string(),
                io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            )
        })
}

/// Run a full benchmark as described by `config`.
pub fn run(config: &Config) -> Result<RunSummary, RunError> {
    let target = Target {
        addr: resolve(&config.target())?,
        response_buffer: config.response_buffer,
        timeout: config.worker_timeout,
    };
    let tasks = partition(
        config.total_transactions,
        config.workers,
        config.distribute_remainder,
    );
    let issued: usize = tasks.iter().map(|t| t.transaction_count).sum();

    info!(
        server = %target.addr,
        workers = tasks.len(),
        requested = config.total_transactions,
        issued,
        "Starting benchmark"
    );

    let outcome = launch(&tasks, &target, config.run_deadline)?;
    let summary = RunSummary::from_results(
        outcome.results,
        config.total_transactions,
        issued,
        outcome.total_elapsed,
    );

    info!(
        elapsed_ms = summary.total_elapsed.as_millis() as u64,
        throughput = summary.throughput as u64,
        succeeded = summary.succeeded,
        failed = summary.failures.len(),
        "Benchmark finished"
    );

    Ok(summary)
}

/// Start one thread per task and wait for every result.
///
/// The clock starts right before the first thread is spawned and stops
/// once every worker that reported has been joined. Workers still silent
/// at `deadline` are reported as `Abandoned` and left detached.
pub fn launch(
    tasks: &[WorkerTask],
    target: &Target,
    deadline: Option<Duration>,
) -> Result<Outcome, RunError> {
    let (tx, rx) = mpsc::channel::<WorkerResult>();
    let mut handles = Vec::with_capacity(tasks.len());

    let start = Instant::now();

    for &task in tasks {
        let worker_tx = tx.clone();
        let target = target.clone();

        let spawned = thread::Builder::new()
            .name(format!("bench-worker-{}", task.worker_id))
            .spawn(move || {
                let _ = worker_tx.send(worker::run(task, &target));
            });

        match spawned {
            Ok(handle) => handles.push((task.worker_id, handle)),
            Err(e) => {
                drop(tx);
                let detached = release_started(handles);
                error!(
                    worker = task.worker_id,
                    error = %e,
                    detached,
                    "Failed to spawn worker, aborting run"
                );
                return Err(RunError::Spawn(e));
            }
        }
    }

    // Only worker threads hold senders from here on
    drop(tx);

    let deadline = deadline.map(|d| start + d);
    let mut results = Vec::with_capacity(tasks.len());
    let mut disconnected = false;

    while results.len() < tasks.len() {
        let received = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(result) => results.push(result),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    reported = results.len(),
                    workers = tasks.len(),
                    "Run deadline passed"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                disconnected = true;
                break;
            }
        }
    }

    // Thread state is sampled before the final drain: a worker sends before
    // its thread exits, so a finished worker's result is always in the drain
    let reported: HashSet<usize> = results.iter().map(WorkerResult::worker_id).collect();
    let silent: Vec<(usize, bool)> = handles
        .iter()
        .filter(|(worker_id, _)| !reported.contains(worker_id))
        .map(|(worker_id, handle)| (*worker_id, disconnected || handle.is_finished()))
        .collect();

    let results = settle(results, rx.try_iter(), &silent);

    for (worker_id, handle) in handles {
        let abandoned = results.iter().any(|r| match r {
            WorkerResult::Failure {
                worker_id: id,
                cause: WorkerError::Abandoned,
            } => *id == worker_id,
            _ => false,
        });
        if !abandoned {
            let _ = handle.join();
        }
    }

    let total_elapsed = start.elapsed();

    Ok(Outcome {
        results,
        total_elapsed,
    })
}

/// Merge results from the receive loop with those that arrived after it
/// stopped, then account for workers that never reported.
///
/// `silent` lists workers the receive loop did not hear from, with whether
/// their thread had already exited. An exited thread without a result
/// panicked; a live one is abandoned.
fn settle(
    mut results: Vec<WorkerResult>,
    late: impl IntoIterator<Item = WorkerResult>,
    silent: &[(usize, bool)],
) -> Vec<WorkerResult> {
    results.extend(late);

    let reported: HashSet<usize> = results.iter().map(WorkerResult::worker_id).collect();
    for &(worker_id, finished) in silent {
        if reported.contains(&worker_id) {
            continue;
        }
        let cause = if finished {
            WorkerError::Panicked
        } else {
            WorkerError::Abandoned
        };
        results.push(WorkerResult::Failure { worker_id, cause });
    }

    for result in &results {
        if let WorkerResult::Failure { worker_id, cause } = result {
            error!(worker = *worker_id, error = %cause, "Worker failed");
        }
    }

    results.sort_by_key(WorkerResult::worker_id);
    results
}

/// Join workers that already exited and detach the rest.
///
/// Returns how many were left running.
fn release_started(handles: Vec<(usize, thread::JoinHandle<()>)>) -> usize {
    let mut detached = 0;
    for (worker_id, handle) in handles {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(worker = worker_id, "Leaving started worker detached");
            detached += 1;
        }
    }
    detached
}
