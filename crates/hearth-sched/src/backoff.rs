use std::time::Duration;

use rand::Rng;

/// Exponential retry delay with bounded growth and optional jitter.
///
/// `next()` grows the current delay geometrically (capped at `max_delay`) and
/// returns a delay randomized within `±jitter` of the new value. The jitter
/// fraction spreads reconnecting clients out so they do not all hit a
/// recovering peer on the same schedule.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    current_delay: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter,
            current_delay: initial_delay,
            attempt: 0,
        }
    }

    /// Advance to the next delay step and return the jittered delay to sleep.
    pub fn next(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let grown = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()));
        self.jittered()
    }

    /// Current un-jittered delay (the center `next()` randomizes around).
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    fn jittered(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.current_delay;
        }
        let center = self.current_delay.as_secs_f64();
        let spread = center * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((center + offset).max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps_without_jitter() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(60), 2.0, 0.0);

        let delays: Vec<u64> = (0..5).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 60, 60]);
        assert_eq!(backoff.attempt(), 5);

        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::from_secs(5));
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn jitter_stays_within_fraction_of_center() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(60), 2.0, 0.1);

        for _ in 0..50 {
            let delay = backoff.next().as_secs_f64();
            let center = backoff.current_delay().as_secs_f64();
            assert!(delay >= center * 0.9 - 1e-9 && delay <= center * 1.1 + 1e-9);
        }
    }

    #[test]
    fn jittered_delay_never_negative() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            2.0,
            1.0,
        );
        for _ in 0..20 {
            let _ = backoff.next();
        }
    }
}
