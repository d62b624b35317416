// SPDX-License-Identifier: PMPL-1.0-or-later
//! Bounded retry around backend calls.
//!
//! [`retry`] drives the attempt loop; a [`RetryCallback`] observes it. The
//! callback only sees what happens, it cannot change the outcome.

use std::future::Future;
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::error::{Result, SparqlError};

/// Result of one finished attempt, as reported to a [`RetryCallback`].
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    Success,
    Failure(&'a SparqlError),
}

impl std::fmt::Display for AttemptOutcome<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => f.write_str("success"),
            AttemptOutcome::Failure(err) => write!(f, "{err}"),
        }
    }
}

/// Observer for a single query's retry loop.
pub trait RetryCallback: Send {
    /// Called once with the full query text before the first attempt.
    fn pre_call(&mut self, query: &str);

    /// Called before every attempt (1-based).
    fn before(&mut self, _attempt: u32) {}

    /// Called after every attempt, successful or not.
    fn after(&mut self, attempt: u32, outcome: AttemptOutcome<'_>);
}

/// Creates a fresh callback for every query execution.
pub type RetryCallbackFactory = Arc<dyn Fn() -> Box<dyn RetryCallback> + Send + Sync>;

/// Factory producing [`LoggingRetryCallback`]s.
pub fn logging_callback_factory() -> RetryCallbackFactory {
    Arc::new(|| Box::new(LoggingRetryCallback::default()) as Box<dyn RetryCallback>)
}

/// Logs the outcome of every attempt together with the query name.
#[derive(Debug, Default)]
pub struct LoggingRetryCallback {
    query_name: String,
}

impl RetryCallback for LoggingRetryCallback {
    fn pre_call(&mut self, query: &str) {
        self.query_name = query_name(query).to_string();
    }

    fn after(&mut self, attempt: u32, outcome: AttemptOutcome<'_>) {
        tracing::info!(
            query = %self.query_name,
            attempt,
            "Query: {}: Attempt {} ended with: {}",
            self.query_name,
            attempt,
            outcome
        );
    }
}

/// Name declared on the first line of a query (`# Name: <name>`).
///
/// The name is the run of ASCII letters, digits and spaces following the
/// marker. Returns an empty string when the query has no such line.
pub fn query_name(query: &str) -> &str {
    let Some(rest) = query.strip_prefix("# Name: ") else {
        return "";
    };
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == ' '))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// Exhaustion wraps the last error in [`SparqlError::RetryExhausted`].
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    callback: &mut dyn RetryCallback,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        callback.before(attempt);
        let outcome = op(attempt).await;
        match &outcome {
            Ok(_) => callback.after(attempt, AttemptOutcome::Success),
            Err(err) => callback.after(attempt, AttemptOutcome::Failure(err)),
        }

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                return Err(SparqlError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                })
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying query");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
