//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Exponential backoff for subchannel reconnects.
//!
//! Delays grow exponentially from the base to the cap, with jitter to
//! prevent thundering-herd reconnects after a backend restart.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff state for one reconnect loop.
///
/// # Examples
///
/// ```rust
/// use h2rpc::channel::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::reconnect();
/// let first = backoff.next_delay();
/// assert!(first >= Duration::from_millis(800));
/// assert!(first <= Duration::from_millis(1200));
/// ```
#[derive(Debug)]
pub struct Backoff {
    /// Delay before the first retry.
    base: Duration,
    /// Upper bound on the delay.
    cap: Duration,
    /// Jitter fraction applied symmetrically around the delay.
    jitter: f64,
    /// Attempts since the last reset.
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff with the given base and cap, ±20% jitter.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.2,
            attempt: 0,
        }
    }

    /// The subchannel reconnect policy: base 1s, cap 120s, jitter ±20%.
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120))
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(31);
        self.attempt = self.attempt.saturating_add(1);
        let grown = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap);
        let factor = 1.0 + self.jitter * rand::thread_rng().gen_range(-1.0..=1.0);
        grown.mul_f64(factor)
    }

    /// Resets after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.jitter = 0.0;
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let mut backoff = Backoff::reconnect();
        for _ in 0..50 {
            let mut probe = Backoff::reconnect();
            let delay = probe.next_delay();
            assert!(delay >= Duration::from_millis(800), "delay {:?}", delay);
            assert!(delay <= Duration::from_millis(1200), "delay {:?}", delay);
        }
        // The cap is also jittered, staying within ±20% of 120s.
        for _ in 0..12 {
            backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped >= Duration::from_secs(96));
        assert!(capped <= Duration::from_secs(144));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        backoff.jitter = 0.0;
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_attempt_overflow_saturates() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(120));
        backoff.jitter = 0.0;
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(120));
        }
    }
}
