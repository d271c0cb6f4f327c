pub type TimerDuration = fugit::Duration<u64, 1, 1_000_000>;
pub type TimerInstant = fugit::Instant<u64, 1, 1_000_000>;

pub use TimerDuration as Duration;
pub use TimerInstant as Instant;

/// Microsecond time source shared by the control loop and the remote link
pub trait Timer {
    fn now(&self) -> Instant;
}

/// Time elapsed from `since` to `now`. Zero if `since` lies in the future
pub fn elapsed(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

/// A periodic tick read between two interrupts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickCounter {
    // Time counted by the tick handler so far
    pub counted: Duration,
    pub period: Duration,
    // Down counter reload value and its current value
    pub reload: u32,
    pub current: u32,
    // The counter reloaded but the tick handler has not counted it yet
    pub wrap_pending: bool,
}

impl TickCounter {
    pub fn now(&self) -> Instant {
        let reload = self.reload.max(1) as u64;
        let passed = reload.saturating_sub(self.current as u64) * self.period.to_micros() / (reload + 1);

        let mut counted = self.counted;
        if self.wrap_pending {
            counted += self.period;
        }
        Instant::from_ticks(counted.to_micros() + passed)
    }
}
