use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Fixed-period schedule for the supervisor loop. A tick that overruns its
/// period delays the next one rather than firing a burst to catch up.
pub struct Ticker {
	interval: Interval,
	period: Duration,
}

impl Ticker {
	pub fn new(period: Duration) -> Self {
		let mut interval = tokio::time::interval(period);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		Self { interval, period }
	}

	pub fn period(&self) -> Duration {
		self.period
	}

	/// Completes immediately the first time, then once per period. Returns
	/// the scheduled deadline, which lags the clock after an overrun.
	pub async fn tick(&mut self) -> Instant {
		self.interval.tick().await
	}
}
