//! Retrieval client: one bounded provider request per work item, with retry
//! and exponential backoff for transient failures.

use crate::provider::{DataProvider, HistoryParams, ProviderError, RawFrame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Which provider call a work item maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Static,
    Historic,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Static => f.write_str("static"),
            RequestKind::Historic => f.write_str("historic"),
        }
    }
}

/// A work item that could not be downloaded.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("{kind} download failed after {attempts} attempts for instruments {instruments:?} and fields {fields:?}: {source}")]
    RetriesExhausted {
        kind: RequestKind,
        instruments: Vec<String>,
        fields: Vec<String>,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("{kind} request rejected for instruments {instruments:?} and fields {fields:?}: {source}")]
    Rejected {
        kind: RequestKind,
        instruments: Vec<String>,
        fields: Vec<String>,
        #[source]
        source: ProviderError,
    },
}

impl DownloadError {
    pub fn kind(&self) -> RequestKind {
        match self {
            DownloadError::RetriesExhausted { kind, .. } | DownloadError::Rejected { kind, .. } => {
                *kind
            }
        }
    }

    pub fn instruments(&self) -> &[String] {
        match self {
            DownloadError::RetriesExhausted { instruments, .. }
            | DownloadError::Rejected { instruments, .. } => instruments,
        }
    }

    pub fn fields(&self) -> &[String] {
        match self {
            DownloadError::RetriesExhausted { fields, .. }
            | DownloadError::Rejected { fields, .. } => fields,
        }
    }
}

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts per work item (at least 1).
    pub max_retries: u32,
    /// Sleep after the first failed attempt.
    pub retry_delay: Duration,
    /// Factor applied to the sleep after every further failure.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Sleeps taken between attempts when every attempt fails.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let mut delay = self.retry_delay;
        let mut out = Vec::new();
        for _ in 1..self.max_retries.max(1) {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Blocking sleep, injectable so tests can observe the backoff.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling worker thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Issues chunked requests against an open provider session.
pub struct RetrievalClient<'p> {
    provider: &'p dyn DataProvider,
    policy: RetryPolicy,
    params: HistoryParams,
    sleeper: Arc<dyn Sleeper>,
}

impl<'p> RetrievalClient<'p> {
    pub fn new(provider: &'p dyn DataProvider, policy: RetryPolicy, params: HistoryParams) -> Self {
        Self {
            provider,
            policy,
            params,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Fetch one (instrument chunk, field chunk) work item.
    ///
    /// Transient provider failures are retried up to `max_retries` attempts
    /// in total, sleeping `retry_delay * backoff_multiplier^n` between them.
    /// Any other provider error is returned straight away.
    pub fn fetch(
        &self,
        instruments: &[String],
        fields: &[String],
        kind: RequestKind,
    ) -> Result<RawFrame, DownloadError> {
        let attempts = self.policy.max_retries.max(1);
        let mut delay = self.policy.retry_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match kind {
                RequestKind::Static => self.provider.get_data(instruments, fields),
                RequestKind::Historic => {
                    self.provider.get_history(instruments, fields, &self.params)
                }
            };

            match result {
                Ok(frame) => return Ok(frame),
                Err(source) if source.is_transient() => {
                    if attempt >= attempts {
                        tracing::error!(
                            %kind,
                            attempts,
                            first = instruments.first().map(String::as_str).unwrap_or(""),
                            last = instruments.last().map(String::as_str).unwrap_or(""),
                            error = %source,
                            "retries exhausted"
                        );
                        return Err(DownloadError::RetriesExhausted {
                            kind,
                            instruments: instruments.to_vec(),
                            fields: fields.to_vec(),
                            attempts,
                            source,
                        });
                    }
                    tracing::debug!(
                        %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "transient provider failure, backing off"
                    );
                    self.sleeper.sleep(delay);
                    delay = self.policy.next_delay(delay);
                }
                Err(source) => {
                    return Err(DownloadError::Rejected {
                        kind,
                        instruments: instruments.to_vec(),
                        fields: fields.to_vec(),
                        source,
                    })
                }
            }
        }
    }
}
