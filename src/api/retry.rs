//! Purpose: Bounded exponential backoff for requests to the configuration service.
//! Exports: `RetryPolicy`.
//! Role: Decides which failures are worth another attempt and how long to wait.
//! Invariants: Attempts are bounded by `max_retries + 1`; waits never exceed `max_wait * 1.5`.
//! Invariants: Only transport failures and 429/5xx (except 501) statuses are retried.
//! Invariants: TLS handshake failures are deterministic and never retried.
use std::error::Error as StdError;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the attempt following `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32, jitter_seed: u64) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let base = self.min_wait.as_secs_f64() * 2f64.powi(exp);
        let capped = base.min(self.max_wait.as_secs_f64());
        Duration::try_from_secs_f64(capped * jitter_factor(attempt, jitter_seed))
            .unwrap_or(self.max_wait)
    }
}

pub(crate) fn retryable_status(status: u16) -> bool {
    status == 429 || (status >= 500 && status != 501)
}

pub(crate) fn retryable_transport(err: &ureq::Transport) -> bool {
    retryable_kind(err.kind()) && !tls_failure(err)
}

fn retryable_kind(kind: ureq::ErrorKind) -> bool {
    matches!(
        kind,
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io
    )
}

// ureq reports handshake failures as ConnectionFailed with the rustls error
// wrapped in an io::Error.
fn tls_failure(err: &ureq::Transport) -> bool {
    err.message()
        .is_some_and(|message| message.starts_with("tls connection"))
        || caused_by_tls(err)
}

fn caused_by_tls(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<rustls::Error>() {
            return true;
        }
        let wrapped = err
            .downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .is_some_and(|inner| inner.is::<rustls::Error>());
        if wrapped {
            return true;
        }
        current = err.source();
    }
    false
}

pub(crate) fn jitter_seed() -> u64 {
    getrandom::u64().unwrap_or_else(|_| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_nanos() as u64)
            .unwrap_or(0)
    })
}

// Factor in [0.5, 1.5).
fn jitter_factor(attempt: u32, jitter_seed: u64) -> f64 {
    let mut x = jitter_seed ^ ((attempt as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    let r = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
    let unit = (r >> 11) as f64 / (1u64 << 53) as f64;
    0.5 + unit
}
