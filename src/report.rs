//! Run summary, verdict and the plain-text report.

use crate::worker::{WorkerError, WorkerResult};
use std::time::Duration;

/// Aggregate view of one benchmark run
#[derive(Debug)]
pub struct RunSummary {
    pub total_elapsed: Duration,
    /// Zero when no worker succeeded
    pub slowest_worker_elapsed: Duration,
    /// Transactions assigned to workers, not the requested total
    pub total_transactions: usize,
    pub requested_transactions: usize,
    pub throughput: f64,
    pub workers: usize,
    pub succeeded: usize,
    pub failures: Vec<(usize, WorkerError)>,
}

/// Outcome of comparing a run against its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    BelowThreshold,
    WorkerFailures,
}

impl Verdict {
    /// Process exit status for this verdict
    pub fn exit_code(self) -> u8 {
        match self {
            Verdict::Success => 0,
            Verdict::BelowThreshold => 1,
            Verdict::WorkerFailures => 2,
        }
    }
}

impl RunSummary {
    /// Build a summary from collected worker results.
    ///
    /// `total_transactions` is the issued count, which may be less than
    /// `requested_transactions` when the total does not divide evenly.
    pub fn from_results(
        results: Vec<WorkerResult>,
        requested_transactions: usize,
        total_transactions: usize,
        total_elapsed: Duration,
    ) -> Self {
        let workers = results.len();
        let slowest_worker_elapsed = slowest(&results);

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for result in results {
            match result {
                WorkerResult::Success { .. } => succeeded += 1,
                WorkerResult::Failure { worker_id, cause } => failures.push((worker_id, cause)),
            }
        }
        failures.sort_by_key(|(worker_id, _)| *worker_id);

        RunSummary {
            total_elapsed,
            slowest_worker_elapsed,
            total_transactions,
            requested_transactions,
            throughput: throughput(total_transactions, total_elapsed),
            workers,
            succeeded,
            failures,
        }
    }

    /// Success requires every worker to finish and throughput strictly
    /// above `threshold`.
    pub fn verdict(&self, threshold: f64) -> Verdict {
        if !self.failures.is_empty() {
            Verdict::WorkerFailures
        } else if self.throughput > threshold {
            Verdict::Success
        } else {
            Verdict::BelowThreshold
        }
    }

    pub fn render(&self, threshold: f64) -> String {
        let mut out = format!(
            "\ntotal time: {:.2} seconds\nslowest worker: {:.2} seconds\nthroughput: {} ops/sec\n",
            self.total_elapsed.as_secs_f64(),
            self.slowest_worker_elapsed.as_secs_f64(),
            format_ops(self.throughput),
        );

        if self.total_transactions != self.requested_transactions {
            out.push_str(&format!(
                "issued: {} of {} requested operations\n",
                self.total_transactions, self.requested_transactions
            ));
        }

        if !self.failures.is_empty() {
            out.push_str(&format!(
                "\n{} of {} workers failed:\n",
                self.failures.len(),
                self.workers
            ));
            for (worker_id, cause) in &self.failures {
                out.push_str(&format!("worker {worker_id} failed: {cause}\n"));
            }
        }

        let target = format_ops(threshold);
        match self.verdict(threshold) {
            Verdict::Success => {
                out.push_str(&format!("\n✓ SUCCESS: exceeded {target} ops/sec target!"))
            }
            Verdict::BelowThreshold => {
                out.push_str(&format!("\n✗ FAILED: did not reach {target} ops/sec target"))
            }
            Verdict::WorkerFailures => out.push_str(&format!(
                "\n✗ FAILED: {} workers did not complete ({target} ops/sec target)",
                self.failures.len()
            )),
        }
        out
    }
}

pub fn banner(total_transactions: usize, workers: usize) -> String {
    format!("running benchmark: {total_transactions} operations across {workers} workers")
}

/// Longest elapsed time among successful workers, independent of order
pub fn slowest(results: &[WorkerResult]) -> Duration {
    results
        .iter()
        .filter_map(|r| match r {
            WorkerResult::Success { elapsed, .. } => Some(*elapsed),
            WorkerResult::Failure { .. } => None,
        })
        .max()
        .unwrap_or_default()
}

/// Transactions per second
pub fn throughput(transactions: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        transactions as f64 / secs
    } else {
        0.0
    }
}

/// Whole number with thousands separators, e.g. `51,813`
fn format_ops(value: f64) -> String {
    let digits = format!("{:.0}", value.max(0.0));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
