//! Jittered, capped exponential backoff for transient channel failures.

use std::time::Duration;

use rand::Rng;

use crate::channel::ChannelError;

/// Exponential backoff state: base doubles per attempt up to `cap`, with
/// up to 25% random jitter so retries from multiple daemons spread out.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Sensible defaults for channel traffic: 250ms doubling to 30s.
    pub fn for_channel() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30))
    }

    /// The next delay, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        exp.mul_f64(1.0 + jitter).min(self.cap.mul_f64(1.25))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Run `op` up to `max_attempts` times, sleeping a backoff delay between
/// transient failures. Permanent failures return immediately; exhaustion
/// surfaces the last transient error as permanent `DeliveryFailed`.
pub fn retry_with_backoff<T>(
    max_attempts: u32,
    mut op: impl FnMut() -> Result<T, ChannelError>,
) -> Result<T, ChannelError> {
    let mut backoff = Backoff::for_channel();
    let mut last_error = String::new();
    for _ in 0..max_attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(ChannelError::Transient(msg)) => {
                tracing::debug!(attempt = backoff.attempt(), error = %msg, "transient, retrying");
                last_error = msg;
                std::thread::sleep(backoff.next_delay());
            }
            Err(other) => return Err(other),
        }
    }
    Err(ChannelError::Permanent(format!(
        "delivery failed after {max_attempts} attempts: {last_error}"
    )))
}
