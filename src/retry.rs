//! Retry strategy generation for HTTP requests.
//!
//! A strategy is a finite list of attempts, each carrying the delay to wait
//! before the attempt and the response timeout to apply to it. Delays grow
//! exponentially with a small random jitter so that clients retrying in
//! lockstep spread out.

use std::time::Duration;

use rand::Rng;

/// Parameters for [`generate_retry_strategy`].
#[derive(Debug, Clone)]
pub struct RetryStrategyOptions {
    /// Number of retry attempts to generate.
    pub retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay for each subsequent retry.
    pub delay_factor: f64,
    /// Response timeout of the first retry.
    pub base_response_timeout: Duration,
    /// Multiplier applied to the response timeout for each subsequent retry.
    pub response_timeout_factor: f64,
}

impl Default for RetryStrategyOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(50),
            delay_factor: 2.0,
            base_response_timeout: Duration::from_millis(300),
            response_timeout_factor: 1.5,
        }
    }
}

/// A single retry attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryAttempt {
    /// How long to wait before issuing this attempt.
    pub delay: Duration,
    /// Response timeout for this attempt.
    pub response_timeout: Duration,
}

/// Generate an exponential backoff strategy with jitter.
///
/// Attempt `i` (zero-based) waits `base_delay * delay_factor^i` plus a random
/// jitter in `[0, 25%)` of that delay, and applies a response timeout of
/// `base_response_timeout * response_timeout_factor^i`.
pub fn generate_retry_strategy(options: &RetryStrategyOptions) -> Vec<RetryAttempt> {
    let mut rng = rand::thread_rng();
    (0..options.retries)
        .map(|i| {
            let delay =
                options.base_delay.as_secs_f64() * options.delay_factor.powi(i as i32);
            let jitter = if delay > 0.0 {
                rng.gen_range(0.0..delay / 4.0)
            } else {
                0.0
            };
            let response_timeout = options.base_response_timeout.as_secs_f64()
                * options.response_timeout_factor.powi(i as i32);
            RetryAttempt {
                delay: Duration::from_secs_f64(delay + jitter),
                response_timeout: Duration::from_secs_f64(response_timeout),
            }
        })
        .collect()
}
