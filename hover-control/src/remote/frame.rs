//! Command frames sent by the steering device and the feedback frame the
//! board answers with.
//!
//! All fields are little endian and every frame ends with a CRC-16/XMODEM
//! over the bytes before it.
//!
//! | type     | layout                                                                         |
//! |----------|--------------------------------------------------------------------------------|
//! | 0x00     | `/`, 0x00, slave, speed: i16, state: u8, crc: u16                              |
//! | 0x01     | `/`, 0x01, slave, speed: i16, steer: i16, state: u8, crc: u16                  |
//! | feedback | 0xABCD: u16, slave, speed: i16, volt: u16, amp: i16, odometer: i32, crc: u16   |
//!
//! Feedback voltage and current are in hundredths, speed is in Hall steps per
//! second and the odometer counts Hall steps.

use heapless::Vec;

use crate::shared::RemoteState;

pub const FRAME_START: u8 = b'/';
pub const MAX_FRAME_LEN: usize = 10;
// Start byte and data type
pub const HEADER_LEN: usize = 2;

pub const FEEDBACK_START: u16 = 0xABCD;
pub const FEEDBACK_LEN: usize = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Speed = 0x00,
    SpeedSteer = 0x01,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FrameType::Speed),
            0x01 => Some(FrameType::SpeedSteer),
            _ => None,
        }
    }

    /// Total length on the wire including start byte and CRC
    pub const fn len(self) -> usize {
        match self {
            FrameType::Speed => 8,
            FrameType::SpeedSteer => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub slave: u8,
    pub speed: i16,
    pub steer: i16,
    pub state: RemoteState,
}

/// What the board reports back after each applied command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Feedback {
    pub slave: u8,
    pub speed: i16,
    pub centivolts: u16,
    pub centiamps: i16,
    pub odometer: i32,
}

impl Feedback {
    pub fn volts(&self) -> f32 {
        self.centivolts as f32 / 100.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    BadStart(u8),
    UnknownType(u8),
    Length { expected: usize, actual: usize },
    Checksum { expected: u16, actual: u16 },
    // Valid frame for another board on the bus
    WrongSlave(u8),
    // The frame did not complete in time
    Timeout,
}

/// CRC-16/XMODEM, polynomial 0x1021, initial value 0
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn read_i16(frame: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([frame[at], frame[at + 1]])
}

/// Check and decode one complete frame
pub fn decode(frame: &[u8]) -> Result<Command, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Length {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }

    if frame[0] != FRAME_START {
        return Err(FrameError::BadStart(frame[0]));
    }

    let frame_type = FrameType::from_byte(frame[1]).ok_or(FrameError::UnknownType(frame[1]))?;
    if frame.len() != frame_type.len() {
        return Err(FrameError::Length {
            expected: frame_type.len(),
            actual: frame.len(),
        });
    }

    let (body, crc) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([crc[0], crc[1]]);
    let expected = crc16(body);
    if actual != expected {
        return Err(FrameError::Checksum { expected, actual });
    }

    let command = match frame_type {
        FrameType::Speed => Command {
            slave: body[2],
            speed: read_i16(body, 3),
            steer: 0,
            state: RemoteState::from_bits(body[5]),
        },
        FrameType::SpeedSteer => Command {
            slave: body[2],
            speed: read_i16(body, 3),
            steer: read_i16(body, 5),
            state: RemoteState::from_bits(body[7]),
        },
    };

    Ok(command)
}

/// Build a frame the way the steering device does
pub fn encode(frame_type: FrameType, command: &Command) -> Vec<u8, MAX_FRAME_LEN> {
    let mut frame: Vec<u8, MAX_FRAME_LEN> = Vec::new();

    // Capacity is MAX_FRAME_LEN and no frame type is longer
    let _ = frame.extend_from_slice(&[FRAME_START, frame_type as u8, command.slave]);
    let _ = frame.extend_from_slice(&command.speed.to_le_bytes());
    if frame_type == FrameType::SpeedSteer {
        let _ = frame.extend_from_slice(&command.steer.to_le_bytes());
    }
    let _ = frame.push(command.state.bits());

    let crc = crc16(&frame).to_le_bytes();
    let _ = frame.extend_from_slice(&crc);

    frame
}

pub fn encode_feedback(feedback: &Feedback) -> [u8; FEEDBACK_LEN] {
    let mut frame = [0; FEEDBACK_LEN];

    frame[0..2].copy_from_slice(&FEEDBACK_START.to_le_bytes());
    frame[2] = feedback.slave;
    frame[3..5].copy_from_slice(&feedback.speed.to_le_bytes());
    frame[5..7].copy_from_slice(&feedback.centivolts.to_le_bytes());
    frame[7..9].copy_from_slice(&feedback.centiamps.to_le_bytes());
    frame[9..13].copy_from_slice(&feedback.odometer.to_le_bytes());

    let crc = crc16(&frame[..FEEDBACK_LEN - 2]);
    frame[FEEDBACK_LEN - 2..].copy_from_slice(&crc.to_le_bytes());

    frame
}

/// Check and decode one complete feedback frame
pub fn decode_feedback(frame: &[u8]) -> Result<Feedback, FrameError> {
    if frame.len() != FEEDBACK_LEN {
        return Err(FrameError::Length {
            expected: FEEDBACK_LEN,
            actual: frame.len(),
        });
    }

    if frame[0..2] != FEEDBACK_START.to_le_bytes() {
        return Err(FrameError::BadStart(frame[0]));
    }

    let (body, crc) = frame.split_at(FEEDBACK_LEN - 2);
    let actual = u16::from_le_bytes([crc[0], crc[1]]);
    let expected = crc16(body);
    if actual != expected {
        return Err(FrameError::Checksum { expected, actual });
    }

    Ok(Feedback {
        slave: body[2],
        speed: read_i16(body, 3),
        centivolts: u16::from_le_bytes([body[5], body[6]]),
        centiamps: read_i16(body, 7),
        odometer: i32::from_le_bytes([body[9], body[10], body[11], body[12]]),
    })
}

/// Find the first valid feedback frame in a chunk of received bytes.
/// Returns it with the number of bytes up to its end
pub fn find_feedback(bytes: &[u8]) -> Option<(Feedback, usize)> {
    bytes
        .windows(FEEDBACK_LEN)
        .enumerate()
        .find_map(|(at, window)| decode_feedback(window).ok().map(|feedback| (feedback, at + FEEDBACK_LEN)))
}
