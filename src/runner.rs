use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EvalError;

/// Interval rate limiter for outbound model calls.
///
/// A single mutex-guarded schedule hands out admission slots, so however
/// many evaluations are suspended waiting, each slot is spent exactly once.
/// Waiters sleep until their reserved slot without holding the lock.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter admitting `rpm` calls per minute; `rpm <= 0` disables it.
    pub fn per_minute(rpm: f64) -> Self {
        let min_interval = if rpm <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / rpm)
        };
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until an admission slot is available.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let scheduled = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(scheduled).await;
    }
}

/// Run `op`, retrying retryable failures with exponential backoff.
///
/// `max_retries` counts additional attempts after the first; the last error
/// is returned once the budget is spent. Non-retryable errors return
/// immediately.
pub async fn with_retries<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, EvalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EvalError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                let delay = base_delay * 2u32.saturating_pow(attempt);
                warn!(attempt = attempt + 1, ?delay, error = %err, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fans a batch of items out over a bounded pool of concurrent evaluations.
///
/// Each in-flight future is tagged with its input index and results are
/// reassembled by index, so the output order always matches the input order
/// no matter when items complete. Cancellation is observed at the
/// permit-acquisition suspension point: in-flight items finish, queued ones
/// are dropped, and whatever completed is returned in order.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn run<'a, T, R, F, Fut>(
        &self,
        items: &'a [T],
        cancel: &CancellationToken,
        evaluate_one: F,
    ) -> Vec<R>
    where
        F: Fn(usize, &'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        let semaphore = Semaphore::new(self.max_concurrent);
        let mut in_flight = FuturesUnordered::new();

        for (index, item) in items.iter().enumerate() {
            let semaphore = &semaphore;
            let evaluate_one = &evaluate_one;
            in_flight.push(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (index, None),
                    permit = semaphore.acquire() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (index, None),
                    },
                };
                (index, Some(evaluate_one(index, item).await))
            });
        }

        let mut slots: Vec<Option<R>> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), || None);
        while let Some((index, result)) = in_flight.next().await {
            if result.is_none() {
                debug!(index, "evaluation skipped after cancellation");
            }
            slots[index] = result;
        }
        slots.into_iter().flatten().collect()
    }
}
