use core::cell::Cell;

use critical_section::Mutex;

use crate::{
    emergency::EmergencyLatch,
    timer::{Duration, Instant},
};

/// Flag byte sent along with every remote command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoteState(u8);

impl RemoteState {
    pub const LED_GREEN: u8 = 0x01;
    pub const LED_ORANGE: u8 = 0x02;
    pub const LED_RED: u8 = 0x04;
    pub const LED_UP: u8 = 0x08;
    pub const LED_DOWN: u8 = 0x10;
    pub const BATTERY_LEDS: u8 = 0x20;
    pub const DISABLE: u8 = 0x40;
    pub const POWER_OFF: u8 = 0x80;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// The remote asked for the motor to stay unpowered
    pub const fn motor_disabled(self) -> bool {
        self.contains(Self::DISABLE)
    }

    /// The remote asked the board to release its self hold
    pub const fn power_off_requested(self) -> bool {
        self.contains(Self::POWER_OFF)
    }
}

/// The motion requested by the steering device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionRequest {
    // Signed, the sign is the direction
    pub speed: i16,
    pub steer: i16,
    pub state: RemoteState,
    // When the last valid command was applied
    pub timestamp: Instant,
}

impl MotionRequest {
    pub const fn idle() -> Self {
        Self {
            speed: 0,
            steer: 0,
            state: RemoteState::from_bits(0),
            timestamp: Instant::from_ticks(0),
        }
    }

    /// Whether the request is older than `bound` at `now`
    pub fn is_stale(&self, now: Instant, bound: Duration) -> bool {
        match now.checked_duration_since(self.timestamp) {
            Some(age) => age > bound,
            None => false,
        }
    }

    /// The speed the motor should actually run at
    pub fn effective_speed(&self) -> i16 {
        if self.state.motor_disabled() {
            0
        } else {
            self.speed
        }
    }
}

impl Default for MotionRequest {
    fn default() -> Self {
        Self::idle()
    }
}

/// State shared between the remote link and the commutation controller
pub struct SharedState {
    request: Mutex<Cell<MotionRequest>>,
    lost_connection: Duration,
    emergency: EmergencyLatch,
}

impl SharedState {
    pub const fn new(lost_connection: Duration) -> Self {
        Self {
            request: Mutex::new(Cell::new(MotionRequest::idle())),
            lost_connection,
            emergency: EmergencyLatch::new(),
        }
    }

    pub fn lost_connection(&self) -> Duration {
        self.lost_connection
    }

    pub fn emergency(&self) -> &EmergencyLatch {
        &self.emergency
    }

    /// Store a freshly validated command and re-arm the staleness window
    pub fn apply(&self, speed: i16, steer: i16, state: RemoteState, now: Instant) {
        let request = MotionRequest {
            speed,
            steer,
            state,
            timestamp: now,
        };

        critical_section::with(|cs| self.request.borrow(cs).set(request));
    }

    /// Zero the stored speed and steer if the request is stale.
    /// Returns true if a non-zero motion was dropped
    pub fn enforce_timeout(&self, now: Instant) -> bool {
        critical_section::with(|cs| {
            let cell = self.request.borrow(cs);
            let mut request = cell.get();

            if request.is_stale(now, self.lost_connection) && (request.speed != 0 || request.steer != 0) {
                request.speed = 0;
                request.steer = 0;
                cell.set(request);
                true
            } else {
                false
            }
        })
    }

    /// Read the whole request at once. A stale request always reads with zero speed
    pub fn motion_request(&self, now: Instant) -> MotionRequest {
        self.enforce_timeout(now);
        critical_section::with(|cs| self.request.borrow(cs).get())
    }

    /// Read the request without applying the staleness check
    pub fn raw_request(&self) -> MotionRequest {
        critical_section::with(|cs| self.request.borrow(cs).get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Instant {
        Instant::from_ticks(value * 1000)
    }

    #[test]
    fn speed_holds_until_the_bound_then_drops() {
        let shared = SharedState::new(Duration::millis(500));
        shared.apply(300, -20, RemoteState::default(), ms(1000));

        assert_eq!(shared.motion_request(ms(1499)).speed, 300);
        assert_eq!(shared.motion_request(ms(1500)).speed, 300);

        let request = shared.motion_request(ms(1501));
        assert_eq!(request.speed, 0);
        assert_eq!(request.steer, 0);
        // The timestamp still tells when the last command arrived
        assert_eq!(request.timestamp, ms(1000));
    }

    #[test]
    fn timeout_only_reports_dropping_motion_once() {
        let shared = SharedState::new(Duration::millis(500));
        shared.apply(10, 0, RemoteState::default(), ms(0));

        assert!(!shared.enforce_timeout(ms(400)));
        assert!(shared.enforce_timeout(ms(600)));
        assert!(!shared.enforce_timeout(ms(700)));
    }

    #[test]
    fn disabled_state_has_no_effective_speed() {
        let request = MotionRequest {
            speed: 500,
            state: RemoteState::from_bits(RemoteState::DISABLE | RemoteState::LED_GREEN),
            ..MotionRequest::idle()
        };
        assert_eq!(request.effective_speed(), 0);
        assert!(!request.state.power_off_requested());
    }

    #[test]
    fn timestamp_in_the_future_is_not_stale() {
        let request = MotionRequest {
            timestamp: ms(10),
            ..MotionRequest::idle()
        };
        assert!(!request.is_stale(ms(5), Duration::millis(1)));
    }
}
