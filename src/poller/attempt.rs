//! Fixed-delay bounded attempt loop.
//!
//! Used by every polling lane in [`super::JobPoller`] and by the
//! content-generation retry in the pipeline, so both share one notion of
//! "attempt budget".

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl AttemptPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Scale both the budget and the delay by the width of a batch, so that
    /// the aggregate request rate of `width` concurrent lanes stays roughly
    /// that of a single lane.
    pub fn scaled_by(&self, width: usize) -> Self {
        let width = u32::try_from(width.max(1)).unwrap_or(u32::MAX);
        Self {
            max_attempts: self.max_attempts.saturating_mul(width),
            delay: self.delay.saturating_mul(width),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, R> {
    /// Stop; the loop returns this value.
    Done(T),
    /// Try again after the delay. `R` describes why.
    Retry(R),
}

/// Budget ran out before any attempt returned [`Attempt::Done`].
#[derive(Debug)]
pub struct Exhausted<R> {
    pub attempts: u32,
    /// Reason given by the final attempt, if any attempt ran.
    pub last: Option<R>,
}

/// Run `op` until it returns [`Attempt::Done`] or `policy.max_attempts`
/// attempts have been made. `op` receives the 1-based attempt number.
/// There is no sleep after the final attempt.
pub async fn run_attempts<F, Fut, T, R>(policy: &AttemptPolicy, mut op: F) -> Result<T, Exhausted<R>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, R>>,
{
    let mut last = None;
    let mut attempt = 0;

    while attempt < policy.max_attempts {
        attempt += 1;
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(reason) => {
                last = Some(reason);
                if attempt < policy.max_attempts && !policy.delay.is_zero() {
                    debug!("Attempt {}/{} not done, waiting {:?}", attempt, policy.max_attempts, policy.delay);
                    sleep(policy.delay).await;
                }
            }
        }
    }

    Err(Exhausted { attempts: attempt, last })
}
