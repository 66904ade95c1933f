//! Connect-with-retry for a contended SQLite file
//!
//! Multiple processes may hold the index open; a locked database is a
//! transient condition worth waiting out, anything else is not.

use std::thread;
use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use tracing::warn;

use super::{IndexError, IndexResult};

/// Backoff policy for opening the index.
///
/// Delay before attempt `n` (zero-based, from the second attempt on) is
/// `base_delay * 2^(n-1)` plus a uniform random jitter in `[0, jitter]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(100),
        }
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Run `connect` until it succeeds or the policy is exhausted.
///
/// Only lock contention is retried; every other error propagates on the
/// first occurrence.
pub fn connect_with_retry<T, F>(policy: &RetryPolicy, mut connect: F) -> IndexResult<T>
where
    F: FnMut() -> Result<T, rusqlite::Error>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;

    for attempt in 1..=attempts {
        match connect() {
            Ok(value) => return Ok(value),
            Err(err) if is_locked(&err) => {
                if attempt == attempts {
                    return Err(IndexError::Unavailable {
                        attempts,
                        source: err,
                    });
                }
                let jitter_ms = if policy.jitter.is_zero() {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=policy.jitter.as_millis() as u64)
                };
                let pause = delay + Duration::from_millis(jitter_ms);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    pause_ms = pause.as_millis() as u64,
                    "index locked, backing off"
                );
                thread::sleep(pause);
                delay *= 2;
            }
            Err(err) => return Err(IndexError::Sqlite(err)),
        }
    }
    unreachable!("loop returns on the final attempt")
}
