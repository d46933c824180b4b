//! Retry controller with exponential backoff for failed or stalled chunks.
//!
//! Both the stall detector and the failed-request path of a
//! [`DownloadSession`](super::DownloadSession) consult the same
//! [`RetryPolicy`], so a chunk gets one retry budget no matter which way
//! its attempts fail.
//!
//! # Example
//!
//! ```
//! use chunkstream_core::download::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//!
//! match policy.decide(0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (retry {})", delay, attempt);
//!     }
//!     RetryDecision::GiveUp { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum retries per chunk (not counting the first attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff multiplier (doubles each retry).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Decision on whether to retry a failed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the chunk request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which retry this will be (1-indexed).
        attempt: u32,
    },

    /// Stop retrying; the session fails as a network error.
    GiveUp {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `base_delay`: 1 second
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: none
///
/// # Delay Calculation
///
/// ```text
/// delay = base_delay * multiplier^retries_made + jitter
/// ```
///
/// With defaults the delays are 1s, 2s, 4s.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed per chunk after the first attempt.
    max_retries: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Multiplier applied for each further retry.
    backoff_multiplier: f32,

    /// Upper bound of the random delay added to each retry.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries per chunk after the first attempt (0 disables retry)
    /// * `base_delay` - Delay before the first retry
    /// * `backoff_multiplier` - Multiplier for exponential increase (values below 1.0 are raised to 1.0)
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, backoff_multiplier: f32) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
            max_jitter: Duration::ZERO,
        }
    }

    /// Creates a policy with a custom retry budget, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Adds up to `max_jitter` of random delay to every retry.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the retry budget per chunk.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    /// Decides whether the current chunk gets another attempt.
    ///
    /// # Arguments
    ///
    /// * `retries_made` - Retries already spent on this chunk (0 after the first failure)
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub fn decide(&self, retries_made: u32) -> RetryDecision {
        if retries_made >= self.max_retries {
            debug!(retries_made, "retry budget exhausted");
            return RetryDecision::GiveUp {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.calculate_delay(retries_made);
        debug!(
            retries_made,
            delay_ms = delay.as_millis(),
            "will retry chunk"
        );

        RetryDecision::Retry {
            delay,
            attempt: retries_made + 1,
        }
    }

    /// Formula: `base_delay * multiplier^retries_made + jitter`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn calculate_delay(&self, retries_made: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let delay_ms = base_ms * multiplier.powi(retries_made as i32);

        Duration::from_millis(delay_ms.round() as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.max_jitter.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
        assert_eq!(policy.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_with_max_retries() {
        let policy = RetryPolicy::with_max_retries(5);
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_multiplier_floor_is_one() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 0.5);
        assert!((policy.backoff_multiplier() - 1.0).abs() < f32::EPSILON);
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_default_delays_are_one_two_four_seconds() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (0..3)
            .map(|made| match policy.decide(made) {
                RetryDecision::Retry { delay, .. } => delay,
                RetryDecision::GiveUp { reason } => panic!("unexpected give up: {reason}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_custom_base_and_multiplier() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), 3.0);
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(4500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default().with_jitter(Duration::from_millis(250));
        for _ in 0..100 {
            let delay = policy.calculate_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1250), "delay {delay:?} exceeds jitter bound");
        }
    }

    // ==================== Decision Tests ====================

    #[test]
    fn test_decide_respects_retry_budget() {
        let policy = RetryPolicy::with_max_retries(3);

        for made in 0..3 {
            let decision = policy.decide(made);
            assert!(matches!(decision, RetryDecision::Retry { attempt, .. } if attempt == made + 1));
        }

        let decision = policy.decide(3);
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
        if let RetryDecision::GiveUp { reason } = decision {
            assert!(reason.contains("exhausted"));
        }
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let policy = RetryPolicy::with_max_retries(0);
        assert!(matches!(policy.decide(0), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn test_default_max_retries_constant() {
        assert_eq!(DEFAULT_MAX_RETRIES, 3);
    }
}
