pub mod frame;

use heapless::Vec;
use log::{debug, info, warn};

use crate::{
    config::*,
    remote::frame::{
        decode, encode_feedback, Command, Feedback, FrameError, FrameType, FEEDBACK_LEN, FRAME_START, HEADER_LEN,
        MAX_FRAME_LEN,
    },
    shared::SharedState,
    timer::{elapsed, Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    pub baud: u32,
    // Speed is forced to zero after this long without a valid command
    pub lost_connection: Duration,
    pub slave_id: u8,
    // A frame that takes longer than this is dropped
    pub frame_timeout: Duration,
}

impl LinkConfig {
    pub fn new(baud: u32, lost_connection: Duration, slave_id: u8) -> Self {
        Self {
            baud,
            lost_connection,
            slave_id,
            frame_timeout: Self::frame_timeout_for(baud),
        }
    }

    /// Nominal wire time of the longest frame, stretched by FRAME_TIMEOUT_FACTOR
    pub fn frame_timeout_for(baud: u32) -> Duration {
        let bits = MAX_FRAME_LEN as u64 * UART_BITS_PER_BYTE;
        let micros = bits * 1_000_000 / baud.max(1) as u64;
        Duration::micros(micros * FRAME_TIMEOUT_FACTOR)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new(
            REMOTE_BAUD,
            Duration::millis(LOST_CONNECTION_STOP_MILLIS),
            REMOTE_SLAVE_ID,
        )
    }
}

/// Receiver state between bytes. Validation happens in the byte that completes a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    AwaitingSync,
    Receiving,
}

/// What happened to a frame once it was complete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Applied(Command),
    Discarded(FrameError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub applied: u32,
    pub discarded: u32,
    // Bytes dropped while looking for a frame start
    pub skipped: u32,
    pub timeouts: u32,
}

/// Receives command frames and keeps the shared motion request fresh
pub struct RemoteLink<'a> {
    shared: &'a SharedState,
    config: LinkConfig,
    state: LinkState,
    buffer: Vec<u8, MAX_FRAME_LEN>,
    expected_len: Option<usize>,
    frame_started: Instant,
    connected: bool,
    // An applied command waits for its feedback frame
    answer_due: bool,
    stats: LinkStats,
}

impl<'a> RemoteLink<'a> {
    pub fn new(shared: &'a SharedState, config: LinkConfig) -> Self {
        info!(
            "Remote link at {} baud, slave {}, stop after {} ms",
            config.baud,
            config.slave_id,
            config.lost_connection.to_millis()
        );

        Self {
            shared,
            config,
            state: LinkState::AwaitingSync,
            buffer: Vec::new(),
            expected_len: None,
            frame_started: Instant::from_ticks(0),
            connected: false,
            answer_due: false,
            stats: LinkStats::default(),
        }
    }

    /// Feed one received byte. Returns the outcome if it completed a frame
    pub fn on_byte(&mut self, byte: u8, now: Instant) -> Option<FrameOutcome> {
        if self.state == LinkState::Receiving && self.frame_expired(now) {
            self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
            let outcome = self.discard(FrameError::Timeout);
            // The late byte may start the next frame
            let next = self.on_byte(byte, now);
            return next.or(Some(outcome));
        }

        match self.state {
            LinkState::AwaitingSync => {
                if byte == FRAME_START {
                    self.buffer.clear();
                    let _ = self.buffer.push(byte);
                    self.expected_len = None;
                    self.frame_started = now;
                    self.state = LinkState::Receiving;
                } else {
                    self.stats.skipped = self.stats.skipped.wrapping_add(1);
                }
                None
            }
            LinkState::Receiving => {
                if self.buffer.push(byte).is_err() {
                    return Some(self.discard(FrameError::Length {
                        expected: MAX_FRAME_LEN,
                        actual: MAX_FRAME_LEN + 1,
                    }));
                }

                if self.buffer.len() == HEADER_LEN {
                    match FrameType::from_byte(byte) {
                        Some(frame_type) => self.expected_len = Some(frame_type.len()),
                        None => return Some(self.discard(FrameError::UnknownType(byte))),
                    }
                }

                match self.expected_len {
                    Some(len) if self.buffer.len() >= len => Some(self.validate(now)),
                    _ => None,
                }
            }
        }
    }

    fn frame_expired(&self, now: Instant) -> bool {
        elapsed(now, self.frame_started) > self.config.frame_timeout
    }

    fn validate(&mut self, now: Instant) -> FrameOutcome {
        let result = decode(&self.buffer).and_then(|command| {
            if command.slave == self.config.slave_id {
                Ok(command)
            } else {
                Err(FrameError::WrongSlave(command.slave))
            }
        });

        match result {
            Ok(command) => self.apply(command, now),
            Err(err) => self.discard(err),
        }
    }

    fn apply(&mut self, command: Command, now: Instant) -> FrameOutcome {
        self.shared
            .apply(command.speed, command.steer, command.state, now);
        self.stats.applied = self.stats.applied.wrapping_add(1);
        self.answer_due = true;

        if !self.connected {
            info!("Steering device connected");
            self.connected = true;
        }

        self.reset();
        FrameOutcome::Applied(command)
    }

    fn discard(&mut self, err: FrameError) -> FrameOutcome {
        // Frames for other boards on the bus are not link errors
        if !matches!(err, FrameError::WrongSlave(_)) {
            self.stats.discarded = self.stats.discarded.wrapping_add(1);
            debug!("Discarded frame {:?}", err);
        }

        self.reset();
        FrameOutcome::Discarded(err)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = None;
        self.state = LinkState::AwaitingSync;
    }

    /// Called every control cycle. Drops unfinished frames that ran out of
    /// time and enforces the lost connection stop
    pub fn poll(&mut self, now: Instant) {
        if self.state == LinkState::Receiving && self.frame_expired(now) {
            self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
            self.discard(FrameError::Timeout);
        }

        let dropped_motion = self.shared.enforce_timeout(now);
        let stale = self
            .shared
            .raw_request()
            .is_stale(now, self.shared.lost_connection());

        if stale && self.connected {
            warn!(
                "No command for {} ms. Stopping",
                self.shared.lost_connection().to_millis()
            );
            self.connected = false;
        } else if dropped_motion {
            warn!("Stale motion request dropped");
        }
    }

    /// Whether a feedback frame should be sent. Each applied command asks for one answer
    pub fn take_answer_due(&mut self) -> bool {
        core::mem::take(&mut self.answer_due)
    }

    /// Feedback frame for the steering device, addressed with this board's slave id
    pub fn answer(&self, speed: i16, centivolts: u16, centiamps: i16, odometer: i32) -> [u8; FEEDBACK_LEN] {
        encode_feedback(&Feedback {
            slave: self.config.slave_id,
            speed,
            centivolts,
            centiamps,
            odometer,
        })
    }

    /// A valid command arrived within the lost connection window
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        remote::frame::{decode_feedback, encode},
        shared::{MotionRequest, RemoteState},
    };

    fn ms(value: u64) -> Instant {
        Instant::from_ticks(value * 1000)
    }

    fn command(speed: i16) -> Command {
        Command {
            slave: REMOTE_SLAVE_ID,
            speed,
            steer: 7,
            state: RemoteState::default(),
        }
    }

    fn feed(link: &mut RemoteLink, bytes: &[u8], now: Instant) -> Option<FrameOutcome> {
        let mut last = None;
        for byte in bytes {
            if let Some(outcome) = link.on_byte(*byte, now) {
                last = Some(outcome);
            }
        }
        last
    }

    fn shared() -> SharedState {
        SharedState::new(Duration::millis(LOST_CONNECTION_STOP_MILLIS))
    }

    #[test]
    fn default_config_uses_the_board_constants() {
        let config = LinkConfig::default();
        assert_eq!(config.baud, 4800);
        assert_eq!(config.lost_connection, Duration::millis(500));
        // 10 bytes of 10 bits at 4800 baud, doubled
        assert_eq!(config.frame_timeout, Duration::micros(41_666));
    }

    #[test]
    fn valid_frame_is_applied() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        let frame = encode(FrameType::SpeedSteer, &command(250));
        let outcome = feed(&mut link, &frame, ms(100));

        assert_eq!(outcome, Some(FrameOutcome::Applied(command(250))));
        let request = shared.motion_request(ms(100));
        assert_eq!(request.speed, 250);
        assert_eq!(request.steer, 7);
        assert_eq!(request.timestamp, ms(100));
        assert!(link.is_connected());
        assert_eq!(link.state(), LinkState::AwaitingSync);
    }

    #[test]
    fn each_applied_command_is_answered_once() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::new(4800, Duration::millis(500), 3));
        assert!(!link.take_answer_due());

        let ours = Command { slave: 3, ..command(120) };
        feed(&mut link, &encode(FrameType::Speed, &ours), ms(10));
        assert!(link.take_answer_due());
        assert!(!link.take_answer_due());

        let answer = link.answer(-15, 3_980, 45, 77);
        let feedback = decode_feedback(&answer).expect("answer is a valid feedback frame");
        assert_eq!(feedback.slave, 3);
        assert_eq!(feedback.speed, -15);
        assert_eq!(feedback.centivolts, 3_980);
        assert_eq!(feedback.odometer, 77);
    }

    #[test]
    fn rejected_frames_are_not_answered() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        let mut corrupted = encode(FrameType::Speed, &command(50));
        corrupted[4] ^= 0x01;
        feed(&mut link, &corrupted, ms(0));
        let other = Command { slave: REMOTE_SLAVE_ID + 1, ..command(50) };
        feed(&mut link, &encode(FrameType::Speed, &other), ms(1));

        assert!(!link.take_answer_due());
    }

    #[test]
    fn garbage_before_the_start_is_skipped() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &[0x00, 0x55, 0xAA], ms(0));
        let frame = encode(FrameType::Speed, &command(-90));
        let outcome = feed(&mut link, &frame, ms(1));

        assert!(matches!(outcome, Some(FrameOutcome::Applied(_))));
        assert_eq!(shared.motion_request(ms(1)).speed, -90);
        assert_eq!(link.stats().skipped, 3);
    }

    #[test]
    fn staleness_window_is_500_ms() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &encode(FrameType::Speed, &command(400)), ms(1000));

        link.poll(ms(1499));
        assert_eq!(shared.motion_request(ms(1499)).speed, 400);
        assert!(link.is_connected());

        link.poll(ms(1501));
        assert_eq!(shared.motion_request(ms(1501)).speed, 0);
        assert!(!link.is_connected());
    }

    #[test]
    fn new_frame_rearms_the_window() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &encode(FrameType::Speed, &command(400)), ms(1000));
        feed(&mut link, &encode(FrameType::Speed, &command(150)), ms(1300));

        link.poll(ms(1799));
        assert_eq!(shared.motion_request(ms(1799)).speed, 150);

        link.poll(ms(1801));
        assert_eq!(shared.motion_request(ms(1801)).speed, 0);
    }

    #[test]
    fn link_recovers_after_a_timeout() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &encode(FrameType::Speed, &command(400)), ms(0));
        link.poll(ms(2000));
        assert_eq!(shared.motion_request(ms(2000)).speed, 0);

        feed(&mut link, &encode(FrameType::Speed, &command(90)), ms(2100));
        assert_eq!(shared.motion_request(ms(2100)).speed, 90);
        assert!(link.is_connected());
    }

    #[test]
    fn malformed_frame_changes_nothing() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &encode(FrameType::SpeedSteer, &command(300)), ms(10));
        let before: MotionRequest = shared.raw_request();

        let mut bad = encode(FrameType::SpeedSteer, &command(-1000));
        bad[4] ^= 0x01;
        let outcome = feed(&mut link, &bad, ms(20));

        assert!(matches!(
            outcome,
            Some(FrameOutcome::Discarded(FrameError::Checksum { .. }))
        ));
        assert_eq!(shared.raw_request(), before);
        assert_eq!(link.stats().discarded, 1);
    }

    #[test]
    fn unknown_type_is_dropped_early() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        let outcome = feed(&mut link, &[FRAME_START, 0x09], ms(0));
        assert_eq!(outcome, Some(FrameOutcome::Discarded(FrameError::UnknownType(0x09))));
        assert_eq!(link.state(), LinkState::AwaitingSync);
        assert_eq!(shared.raw_request(), MotionRequest::idle());
    }

    #[test]
    fn frame_for_another_slave_does_not_refresh() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &encode(FrameType::Speed, &command(200)), ms(0));

        let other = Command {
            slave: REMOTE_SLAVE_ID + 1,
            ..command(700)
        };
        let outcome = feed(&mut link, &encode(FrameType::Speed, &other), ms(400));
        assert_eq!(outcome, Some(FrameOutcome::Discarded(FrameError::WrongSlave(REMOTE_SLAVE_ID + 1))));

        assert_eq!(shared.motion_request(ms(400)).speed, 200);
        assert_eq!(shared.motion_request(ms(501)).speed, 0);
        assert_eq!(link.stats().discarded, 0);
    }

    #[test]
    fn slow_frame_is_dropped() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        let frame = encode(FrameType::Speed, &command(333));
        feed(&mut link, &frame[..4], ms(0));
        link.poll(ms(100));
        assert_eq!(link.state(), LinkState::AwaitingSync);
        assert_eq!(link.stats().timeouts, 1);

        // The tail on its own is garbage
        assert_eq!(feed(&mut link, &frame[4..], ms(101)), None);
        assert_eq!(shared.raw_request(), MotionRequest::idle());
    }

    #[test]
    fn late_byte_can_start_the_next_frame() {
        let shared = shared();
        let mut link = RemoteLink::new(&shared, LinkConfig::default());

        feed(&mut link, &[FRAME_START, 0x00, 0x00], ms(0));
        let frame = encode(FrameType::Speed, &command(55));
        let first = link.on_byte(frame[0], ms(200));
        assert_eq!(first, Some(FrameOutcome::Discarded(FrameError::Timeout)));

        let outcome = feed(&mut link, &frame[1..], ms(201));
        let expected = Command {
            steer: 0,
            ..command(55)
        };
        assert_eq!(outcome, Some(FrameOutcome::Applied(expected)));
    }
}
