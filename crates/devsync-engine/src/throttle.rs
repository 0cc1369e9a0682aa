//! Bandwidth throttling for transfer streams
//!
//! A [`BandwidthLimiter`] caps the byte throughput of one transfer
//! direction using the token bucket algorithm: the bucket holds one
//! second's worth of budget, tokens are fractional for smooth refill, and
//! workers consume tokens in chunk-sized steps so concurrent transfers
//! share the budget fairly instead of one large file draining it alone.
//!
//! A configured rate of 0 KB/s disables throttling entirely. The limiter is
//! transparent to the decision engine; pipelines call
//! [`throttle`](BandwidthLimiter::throttle) between reading content and
//! handing it to the transport.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Pacing granularity: workers acquire budget in steps of at most this many
/// bytes so interleaved transfers stay responsive.
const CHUNK_BYTES: u64 = 16 * 1024;

/// Longest single sleep while waiting for refill.
const MAX_WAIT: Duration = Duration::from_millis(500);

/// Mutable bucket state, protected by a Mutex.
#[derive(Debug)]
struct BucketInner {
    /// Currently available budget in bytes (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
}

/// Token-bucket byte throttle for one transfer direction.
#[derive(Debug)]
pub struct BandwidthLimiter {
    /// Refill rate in bytes per second; 0.0 means unlimited
    rate: f64,
    /// Maximum accumulated budget (one second's worth)
    capacity: f64,
    inner: Mutex<BucketInner>,
}

impl BandwidthLimiter {
    /// Create a limiter capped at `kbps` kilobytes per second.
    ///
    /// A value of 0 means unlimited.
    #[must_use]
    pub fn new(kbps: u64) -> Self {
        let rate = (kbps * 1024) as f64;
        Self {
            rate,
            capacity: rate,
            inner: Mutex::new(BucketInner {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter that never delays.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Whether this limiter is a no-op.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate == 0.0
    }

    /// Consume budget for `bytes`, sleeping as needed to hold the rate.
    ///
    /// Budget is acquired in [`CHUNK_BYTES`] steps; the call returns once
    /// the full amount has been granted.
    pub async fn throttle(&self, bytes: u64) {
        if self.is_unlimited() || bytes == 0 {
            return;
        }

        let step_size = CHUNK_BYTES.min(self.capacity as u64).max(1) as f64;
        let mut remaining = bytes as f64;

        while remaining > 0.0 {
            let step = remaining.min(step_size);
            loop {
                let wait = self.try_take(step);
                if wait.is_zero() {
                    break;
                }
                trace!(wait_ms = wait.as_millis() as u64, "bandwidth throttle waiting");
                tokio::time::sleep(wait.min(MAX_WAIT)).await;
            }
            remaining -= step;
        }
    }

    /// Refill based on elapsed time, then either take `amount` tokens and
    /// return zero, or return how long until enough budget accumulates.
    fn try_take(&self, amount: f64) -> Duration {
        let mut inner = self.inner.lock().expect("bandwidth bucket poisoned");

        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.rate).min(self.capacity);
            inner.last_refill = now;
        }

        if inner.tokens >= amount {
            inner.tokens -= amount;
            Duration::ZERO
        } else {
            let deficit = amount - inner.tokens;
            Duration::from_secs_f64(deficit / self.rate)
        }
    }
}
