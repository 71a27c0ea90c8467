/// Tracks elapsed time from an explicit start instant.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    started_ms: u64,
}

impl Timer {
    pub fn start(now_ms: u64) -> Self {
        Self { started_ms: now_ms }
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.started_ms = now_ms;
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms)
    }

    pub fn has_elapsed(&self, now_ms: u64, ms: u64) -> bool {
        self.elapsed_ms(now_ms) >= ms
    }
}

/// Fires once every `interval_ms`; `check` resets the window when it fires.
#[derive(Clone, Copy, Debug)]
pub struct IntervalTimer {
    interval_ms: u64,
    last_fire_ms: u64,
}

impl IntervalTimer {
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fire_ms: now_ms,
        }
    }

    pub fn check(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_fire_ms) >= self.interval_ms {
            self.last_fire_ms = now_ms;
            return true;
        }
        false
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.last_fire_ms = now_ms;
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_elapsed_from_start() {
        let mut timer = Timer::start(1_000);
        assert_eq!(timer.elapsed_ms(1_250), 250);
        assert!(timer.has_elapsed(1_250, 250));
        assert!(!timer.has_elapsed(1_250, 251));

        timer.reset(2_000);
        assert_eq!(timer.elapsed_ms(2_000), 0);
    }

    #[test]
    fn timer_saturates_on_clock_regression() {
        let timer = Timer::start(5_000);
        assert_eq!(timer.elapsed_ms(4_000), 0);
    }

    #[test]
    fn interval_timer_fires_once_per_window() {
        let mut interval = IntervalTimer::new(100, 0);
        assert!(!interval.check(50));
        assert!(interval.check(100));
        // Window restarts from the firing instant, not accumulating backlog.
        assert!(!interval.check(150));
        assert!(interval.check(210));
    }
}
