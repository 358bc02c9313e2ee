//! # Reconnect Backoff
//!
//! Delay before reopening a closed channel. Starts at zero, grows by a fixed
//! step per consecutive failure, capped; resets once authenticated.

use std::time::Duration;

/// Reconnect delay policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    current_ms: u64,
    step_ms: u64,
    max_ms: u64,
}

impl ReconnectBackoff {
    /// Policy growing by `step_ms` up to `max_ms`.
    pub fn new(step_ms: u64, max_ms: u64) -> Self {
        Self {
            current_ms: 0,
            step_ms,
            max_ms,
        }
    }

    /// Delay for the attempt being scheduled now; the next one waits longer.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms + self.step_ms).min(self.max_ms);
        Duration::from_millis(delay)
    }

    /// Delay the next attempt would get, without consuming it.
    pub fn peek(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Back to zero after a successful handshake.
    pub fn reset(&mut self) {
        self.current_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_and_reset() {
        let mut backoff = ReconnectBackoff::new(1_000, 10_000);
        let delays: Vec<u64> = (0..13).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(&delays[..4], &[0, 1_000, 2_000, 3_000]);
        assert_eq!(delays[10], 10_000);
        assert_eq!(delays[12], 10_000);

        backoff.reset();
        assert_eq!(backoff.peek(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_non_decreasing_and_capped(step in 1u64..5_000, max in 0u64..20_000, n in 1usize..50) {
            let mut backoff = ReconnectBackoff::new(step, max);
            let mut previous = Duration::ZERO;
            for _ in 0..n {
                let delay = backoff.next_delay();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_millis(max));
                previous = delay;
            }
        }
    }
}
