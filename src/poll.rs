//! Processing-state poller.
//!
//! After upload the provider processes the file asynchronously. The
//! poller queries the file once, then keeps sleeping and re-querying while
//! the state is `PROCESSING`. Any other state ends the loop. The schedule
//! comes from a [`PollPolicy`]:
//!
//! - the first sleep is `interval`; each later one is multiplied by
//!   `backoff` and capped at `max_interval` (`backoff = 1.0` is the
//!   constant 2 s cadence of the default policy),
//! - `max_attempts` bounds the number of status queries,
//! - `max_elapsed` bounds the total time spent waiting.
//!
//! With both bounds unset the poller waits for as long as the provider
//! keeps reporting `PROCESSING`.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{ChatError, ChatResult};
use crate::models::{FileState, RemoteFile};
use crate::progress::{IngestEvent, IngestProgressReporter};
use crate::provider::Provider;

/// Schedule and bounds for [`wait_for_processing`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: f64,
    pub max_interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            backoff: 1.0,
            max_interval: Duration::from_secs(30),
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl PollPolicy {
    /// Delay before status query number `attempt + 1` (1-based `attempt`).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.interval.as_secs_f64() * self.backoff.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }
}

/// Poll `name` until the provider finishes processing it.
///
/// Returns the `ACTIVE` file (its `uri` and `mime_type` are what the cache
/// builder must reference). A `FAILED` state becomes
/// [`ChatError::ProcessingFailed`]; exceeding a policy bound becomes
/// [`ChatError::ProcessingTimedOut`]. A status query that errors is
/// surfaced as [`ChatError::Upload`], the stage that owns the file.
pub async fn wait_for_processing(
    provider: &dyn Provider,
    name: &str,
    policy: &PollPolicy,
    progress: &dyn IngestProgressReporter,
) -> ChatResult<RemoteFile> {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let file = provider.get_file(name).await.map_err(ChatError::upload)?;
        attempts += 1;
        progress.report(IngestEvent::Polled {
            name: name.to_string(),
            attempt: attempts,
            state: file.state,
        });

        if !file.state.is_in_flight() {
            return finish(file);
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(timed_out(name, attempts, started));
        }

        let delay = policy.delay_after(attempts);
        if let Some(max_elapsed) = policy.max_elapsed {
            if started.elapsed() + delay > max_elapsed {
                return Err(timed_out(name, attempts, started));
            }
        }

        tracing::info!(%name, attempt = attempts, ?delay, "file still processing");
        tokio::time::sleep(delay).await;
    }
}

fn finish(file: RemoteFile) -> ChatResult<RemoteFile> {
    match file.state {
        FileState::Failed => Err(ChatError::ProcessingFailed {
            reason: file
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "provider reported FAILED".to_string()),
            name: file.name,
        }),
        FileState::Active => {
            tracing::info!(name = %file.name, uri = %file.uri, mime_type = %file.mime_type, "file processing complete");
            Ok(file)
        }
        other => {
            // Anything that is neither in flight nor FAILED is handed on as-is.
            tracing::warn!(name = %file.name, state = ?other, "file left processing in an unexpected state");
            Ok(file)
        }
    }
}

fn timed_out(name: &str, attempts: u32, started: Instant) -> ChatError {
    ChatError::ProcessingTimedOut {
        name: name.to_string(),
        attempts,
        elapsed: started.elapsed(),
    }
}
