use std::time::{Duration, Instant};

const RESET_INTERVAL: Duration = Duration::from_secs(60);
const JITTER_RATIO: f64 = 0.5;
const MAX_DOUBLINGS: u32 = 16;

/// Exponential backoff with jitter for the streaming reconnect schedule.
///
/// The delay grows as `first_delay * 2^retries` up to `max_delay`; each delay is
/// `backoff / 2 + jitter` with jitter uniformly drawn from `[0, backoff / 2)`.
/// The retry counter resets once a connection stayed healthy longer than the
/// reset interval.
pub(crate) struct BackoffStrategy {
    retries: u32,
    first_delay: Duration,
    max_delay: Duration,
    reset_interval: Duration,
    last_good_run: Option<Instant>,
}

impl BackoffStrategy {
    pub fn new(first_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries: 0,
            first_delay,
            max_delay,
            reset_interval: RESET_INTERVAL,
            last_good_run: None,
        }
    }

    #[cfg(test)]
    fn with_reset_interval(mut self, reset_interval: Duration) -> Self {
        self.reset_interval = reset_interval;
        self
    }

    pub fn record_good_run(&mut self) {
        self.last_good_run = Some(Instant::now());
    }

    pub fn next_delay(&mut self) -> Duration {
        if let Some(good_run) = self.last_good_run {
            if good_run.elapsed() >= self.reset_interval {
                self.retries = 0;
            }
        }
        let backoff = (self.first_delay.as_secs_f64() * 2f64.powi(self.retries.min(MAX_DOUBLINGS) as i32))
            .min(self.max_delay.as_secs_f64());
        let delay = backoff / 2.0 + backoff * JITTER_RATIO * rand::random::<f64>();
        self.retries += 1;
        self.last_good_run = None;
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod backoff_tests {
    use super::BackoffStrategy;
    use std::time::Duration;

    #[test]
    fn delays_stay_within_the_jitter_band() {
        let mut strategy = BackoffStrategy::new(Duration::from_secs(1), Duration::from_secs(60));
        for retry in 0..4 {
            let backoff = (1u64 << retry) as f64;
            let delay = strategy.next_delay().as_secs_f64();
            assert!(delay >= backoff / 2.0, "retry {retry}: {delay} below band");
            assert!(delay <= backoff, "retry {retry}: {delay} above band");
        }
    }

    #[test]
    fn delay_is_capped() {
        let mut strategy = BackoffStrategy::new(Duration::from_secs(1), Duration::from_secs(8));
        for _ in 0..10 {
            strategy.next_delay();
        }
        assert!(strategy.next_delay() <= Duration::from_secs(8));
    }

    #[test]
    fn good_run_resets_the_schedule() {
        let mut strategy = BackoffStrategy::new(Duration::from_secs(1), Duration::from_secs(60))
            .with_reset_interval(Duration::ZERO);
        for _ in 0..5 {
            strategy.next_delay();
        }
        strategy.record_good_run();
        let delay = strategy.next_delay().as_secs_f64();
        assert!(delay <= 1.0, "expected a first-delay band after reset, got {delay}");
    }
}
