//! # Retry pacing.
//!
//! [`BackoffPolicy`] turns "this is retry number `n` for the identity" into a
//! pause taken before the task goes back into the queue. With the default
//! `factor = 1.0` every retry waits exactly `first` (the RetryInterval);
//! a larger factor grows the pause geometrically up to `max`.
//!
//! The base for retry `n` is `first × factor^n`, clamped to `max`, then jitter
//! is applied. The base never depends on a previous jittered value, so delays
//! cannot drift downwards over many retries.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use scriptvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(2),
//!     factor: 3.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(200));
//! assert_eq!(backoff.next(1), Duration::from_millis(600));
//! assert_eq!(backoff.next(5), Duration::from_secs(2)); // capped
//! ```

use std::time::Duration;

use super::jitter::JitterPolicy;

/// Delay schedule between a failure and its re-enqueue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Pause before the first retry (the RetryInterval).
    pub first: Duration,
    /// Upper bound for any pause.
    pub max: Duration,
    /// Growth per retry (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to the clamped base.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 1.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Constant pause of `interval` before every retry.
    pub fn constant(interval: Duration) -> Self {
        Self {
            first: interval,
            max: interval,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Pause before retry number `retry` (0-based).
    pub fn next(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor,
            jitter,
        }
    }

    #[test]
    fn constant_by_default() {
        let p = BackoffPolicy::constant(Duration::from_millis(10));
        for n in 0..20 {
            assert_eq!(p.next(n), Duration::from_millis(10));
        }
    }

    #[test]
    fn exponential_growth_is_capped() {
        let p = policy(2.0, JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(10), Duration::from_secs(10));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(20),
            ..policy(1.0, JitterPolicy::None)
        };
        assert_eq!(p.next(0), Duration::from_secs(10));
    }

    #[test]
    fn jittered_delays_stay_within_base() {
        let full = policy(2.0, JitterPolicy::Full);
        let equal = policy(2.0, JitterPolicy::Equal);
        for n in 0..12 {
            let base = policy(2.0, JitterPolicy::None).next(n);
            assert!(full.next(n) <= base);
            let e = equal.next(n);
            assert!(e >= base / 2 && e <= base, "retry {n}: {e:?} outside [{:?}, {base:?}]", base / 2);
        }
    }
}
