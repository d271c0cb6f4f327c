use log::{error, info, warn};
use portable_atomic::{AtomicBool, Ordering};

/// The short circuit shutdown line
pub trait ShutdownInput {
    fn is_asserted(&mut self) -> bool;
}

/// Sticky emergency flag.
///
/// Can be tripped from any interrupt. Only [`ShutdownMonitor::try_reset`] clears it.
pub struct EmergencyLatch {
    tripped: AtomicBool,
}

impl EmergencyLatch {
    pub const fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
        }
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }
}

impl Default for EmergencyLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetError {
    /// The shutdown line is still asserted
    InputAsserted,
    /// The line was released but has not been quiet for long enough
    NotSettled { released_samples: u16, required: u16 },
}

/// Polls the shutdown line and decides when the latch may be reset.
///
/// A single asserted sample trips the latch. A reset needs the line to read
/// released for `release_samples` consecutive samples, counted from the
/// first sample that saw the latch tripped, whoever tripped it.
pub struct ShutdownMonitor<S: ShutdownInput> {
    input: S,
    release_samples: u16,
    released_samples: u16,
    // Latch state at the previous sample
    latch_seen: bool,
}

impl<S: ShutdownInput> ShutdownMonitor<S> {
    pub fn new(input: S, release_samples: u16) -> Self {
        Self {
            input,
            release_samples,
            released_samples: 0,
            latch_seen: false,
        }
    }

    /// Sample the line once. Returns whether it is asserted
    pub fn sample(&mut self, latch: &EmergencyLatch) -> bool {
        let asserted = self.input.is_asserted();

        if asserted {
            if !latch.is_tripped() {
                error!("Emergency shutdown input asserted. All gates off");
            }
            latch.trip();
        }

        // A trip from an interrupt or a pulse between two samples restarts the count too
        let tripped = latch.is_tripped();
        if asserted || (tripped && !self.latch_seen) {
            self.released_samples = 0;
        } else {
            self.released_samples = self.released_samples.saturating_add(1);
        }
        self.latch_seen = tripped;

        asserted
    }

    /// Clear the latch if the shutdown line has settled
    pub fn try_reset(&mut self, latch: &EmergencyLatch) -> Result<(), ResetError> {
        if !latch.is_tripped() {
            return Ok(());
        }

        if self.sample(latch) {
            warn!("Emergency reset refused. Shutdown input still asserted");
            return Err(ResetError::InputAsserted);
        }

        if self.released_samples < self.release_samples {
            warn!(
                "Emergency reset refused. Input released for {} of {} samples",
                self.released_samples, self.release_samples
            );
            return Err(ResetError::NotSettled {
                released_samples: self.released_samples,
                required: self.release_samples,
            });
        }

        latch.clear();
        self.latch_seen = false;
        info!("Emergency latch reset");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::rc::Rc;
    use std::cell::Cell;

    #[derive(Clone, Default)]
    pub(crate) struct FakeShutdown(pub Rc<Cell<bool>>);

    impl ShutdownInput for FakeShutdown {
        fn is_asserted(&mut self) -> bool {
            self.0.get()
        }
    }

    #[test]
    fn one_asserted_sample_trips_the_latch() {
        let line = FakeShutdown::default();
        let latch = EmergencyLatch::new();
        let mut monitor = ShutdownMonitor::new(line.clone(), 3);

        assert!(!monitor.sample(&latch));
        assert!(!latch.is_tripped());

        line.0.set(true);
        assert!(monitor.sample(&latch));
        line.0.set(false);
        assert!(latch.is_tripped());

        // Stays tripped after the line clears on its own
        for _ in 0..10 {
            monitor.sample(&latch);
        }
        assert!(latch.is_tripped());
    }

    #[test]
    fn reset_needs_a_settled_line() {
        let line = FakeShutdown::default();
        let latch = EmergencyLatch::new();
        let mut monitor = ShutdownMonitor::new(line.clone(), 3);

        line.0.set(true);
        monitor.sample(&latch);
        assert_eq!(monitor.try_reset(&latch), Err(ResetError::InputAsserted));

        line.0.set(false);
        monitor.sample(&latch);
        assert_eq!(
            monitor.try_reset(&latch),
            Err(ResetError::NotSettled {
                released_samples: 2,
                required: 3
            })
        );
        assert!(latch.is_tripped());

        assert_eq!(monitor.try_reset(&latch), Ok(()));
        assert!(!latch.is_tripped());
    }

    #[test]
    fn reset_of_an_untripped_latch_is_a_no_op() {
        let latch = EmergencyLatch::new();
        let mut monitor = ShutdownMonitor::new(FakeShutdown::default(), 100);
        assert_eq!(monitor.try_reset(&latch), Ok(()));
    }

    #[test]
    fn latch_tripped_elsewhere_waits_for_samples() {
        let latch = EmergencyLatch::new();
        let mut monitor = ShutdownMonitor::new(FakeShutdown::default(), 2);
        for _ in 0..400 {
            monitor.sample(&latch);
        }

        // e.g. from the break interrupt, the line already reads released again
        latch.trip();
        assert_eq!(
            monitor.try_reset(&latch),
            Err(ResetError::NotSettled {
                released_samples: 0,
                required: 2
            })
        );
        assert_eq!(
            monitor.try_reset(&latch),
            Err(ResetError::NotSettled {
                released_samples: 1,
                required: 2
            })
        );
        assert!(latch.is_tripped());

        assert_eq!(monitor.try_reset(&latch), Ok(()));
        assert!(!latch.is_tripped());
    }

    #[test]
    fn second_trip_after_a_reset_starts_over() {
        let line = FakeShutdown::default();
        let latch = EmergencyLatch::new();
        let mut monitor = ShutdownMonitor::new(line.clone(), 2);

        line.0.set(true);
        monitor.sample(&latch);
        line.0.set(false);
        for _ in 0..5 {
            monitor.sample(&latch);
        }
        assert_eq!(monitor.try_reset(&latch), Ok(()));

        // Tripped again before the monitor sampled the cleared latch
        latch.trip();
        assert!(matches!(
            monitor.try_reset(&latch),
            Err(ResetError::NotSettled { .. })
        ));
    }
}
