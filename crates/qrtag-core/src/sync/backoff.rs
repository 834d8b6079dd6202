//! Retry scheduling for failed operations
//!
//! Delays grow exponentially from `base` (2s, 4s, 8s, ...) up to `cap`, each
//! one scaled by a random factor in `1 ± jitter` so that operations failing
//! together do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::config::SyncSettings;

/// Backoff parameters and the retry ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Relative jitter in `[0, 1)`
    pub jitter: f64,
    /// Failed attempts after which an operation is abandoned
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            base: settings.backoff_base,
            cap: settings.backoff_cap,
            jitter: settings.backoff_jitter.clamp(0.0, 0.99),
            max_attempts: settings.max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based) without jitter
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Jittered delay before retry number `attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.apply_jitter(self.nominal_delay(attempt), unit)
    }

    /// Scale `nominal` by `1 + jitter * unit`, where `unit` is in `[-1, 1]`.
    ///
    /// The result never exceeds `cap`, so delays that reached the cap only
    /// jitter downward.
    #[must_use]
    pub fn apply_jitter(&self, nominal: Duration, unit: f64) -> Duration {
        let factor = self.jitter.mul_add(unit.clamp(-1.0, 1.0), 1.0);
        nominal.mul_f64(factor.max(0.0)).min(self.cap)
    }

    /// Whether `attempt` failed attempts exhaust the retry budget
    #[must_use]
    pub const fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_delays_double_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(4));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(8), Duration::from_secs(256));
        assert_eq!(policy.nominal_delay(9), Duration::from_secs(300));
        assert_eq!(policy.nominal_delay(200), Duration::from_secs(300));
    }

    fn assert_close(actual: Duration, expected_ms: u128) {
        let actual_ms = actual.as_millis();
        assert!(
            actual_ms.abs_diff(expected_ms) <= 1,
            "expected ~{expected_ms}ms, got {actual:?}"
        );
    }

    #[test]
    fn jitter_bounds_are_twenty_percent() {
        let policy = BackoffPolicy::default();
        let nominal = Duration::from_secs(10);
        assert_close(policy.apply_jitter(nominal, -1.0), 8_000);
        assert_close(policy.apply_jitter(nominal, 1.0), 12_000);
        assert_eq!(policy.apply_jitter(nominal, 0.0), nominal);
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        let delay = policy.apply_jitter(Duration::from_secs(300), 1.0);
        assert_eq!(delay, Duration::from_secs(300));
    }

    #[test]
    fn jitter_at_cap_only_shortens_delay() {
        let policy = BackoffPolicy::default();
        let at_cap = policy.nominal_delay(20);
        assert_eq!(at_cap, policy.cap);
        assert_eq!(policy.apply_jitter(at_cap, 1.0), policy.cap);
        assert_eq!(policy.apply_jitter(at_cap, 0.5), policy.cap);
        assert_close(policy.apply_jitter(at_cap, -1.0), 240_000);
        for _ in 0..50 {
            assert!(policy.delay_for(20) <= policy.cap);
        }
    }

    #[test]
    fn random_delays_stay_in_range() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=3 {
            let nominal_ms = policy.nominal_delay(attempt).as_millis();
            for _ in 0..50 {
                let delay_ms = policy.delay_for(attempt).as_millis();
                assert!(delay_ms + 1 >= nominal_ms * 8 / 10, "{delay_ms}ms too short");
                assert!(delay_ms <= nominal_ms * 12 / 10 + 1, "{delay_ms}ms too long");
            }
        }
    }

    #[test]
    fn exhaustion_follows_max_attempts() {
        let policy = BackoffPolicy::from_settings(&SyncSettings::default().with_max_attempts(4));
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
