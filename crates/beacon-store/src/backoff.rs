//! Reconnect delay calculation.

use std::time::Duration;

use beacon_settings::StoreSettings;

/// Exponential backoff with jitter between failed reconnect attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Symmetric jitter range (0.0–1.0).
    pub jitter_factor: f64,
}

impl ReconnectPolicy {
    /// Build from store settings.
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            base_delay_ms: settings.reconnect_base_delay_ms,
            max_delay_ms: settings.reconnect_max_delay_ms,
            jitter_factor: settings.reconnect_jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay after the zero-based failed `attempt`, using thread-local randomness.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms_with_random(attempt, rand::random::<f64>()))
    }

    /// `min(max, base * 2^attempt) * (1 ± jitter)`, with `random` in `[0, 1)`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_ms_with_random(&self, attempt: u32, random: f64) -> u64 {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);

        // maps random [0,1) onto [-jitter, +jitter]
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        ((capped as f64) * jitter).round().max(0.0) as u64
    }
}
