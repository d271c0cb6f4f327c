use embedded_hal::digital::InputPin;

/// Raw reading of the three Hall sensors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HallState {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl HallState {
    pub const fn new(a: bool, b: bool, c: bool) -> Self {
        Self { a, b, c }
    }

    /// A in bit 0, B in bit 1, C in bit 2
    pub const fn bits(self) -> u8 {
        (self.a as u8) | (self.b as u8) << 1 | (self.c as u8) << 2
    }

    /// All sensors low or all sensors high can not happen with a healthy rotor
    pub const fn is_fault(self) -> bool {
        let bits = self.bits();
        bits == 0b000 || bits == 0b111
    }
}

/// Electrical rotor sector, numbered in the order the sectors pass when turning forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RotorSector {
    S1 = 1,
    S2 = 2,
    S3 = 3,
    S4 = 4,
    S5 = 5,
    S6 = 6,
}

/// The Hall reading could not be mapped onto a sector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HallFault(pub HallState);

// Indexed by HallState::bits()
const HALL_TO_SECTOR: [Option<RotorSector>; 8] = [
    None,                  // 000
    Some(RotorSector::S1), // A
    Some(RotorSector::S3), // B
    Some(RotorSector::S2), // A B
    Some(RotorSector::S5), // C
    Some(RotorSector::S6), // A C
    Some(RotorSector::S4), // B C
    None,                  // A B C
];

impl RotorSector {
    pub const ALL: [RotorSector; 6] = [
        RotorSector::S1,
        RotorSector::S2,
        RotorSector::S3,
        RotorSector::S4,
        RotorSector::S5,
        RotorSector::S6,
    ];

    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Zero based index for table lookups
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    pub const fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % 6]
    }

    pub const fn previous(self) -> Self {
        Self::ALL[(self.index() + 5) % 6]
    }

    /// The Hall reading that decodes to this sector
    pub const fn hall_state(self) -> HallState {
        match self {
            RotorSector::S1 => HallState::new(true, false, false),
            RotorSector::S2 => HallState::new(true, true, false),
            RotorSector::S3 => HallState::new(false, true, false),
            RotorSector::S4 => HallState::new(false, true, true),
            RotorSector::S5 => HallState::new(false, false, true),
            RotorSector::S6 => HallState::new(true, false, true),
        }
    }
}

/// Map a Hall reading onto the rotor sector
pub fn decode_sector(hall: HallState) -> Result<RotorSector, HallFault> {
    HALL_TO_SECTOR[hall.bits() as usize].ok_or(HallFault(hall))
}

pub trait HallSensors {
    /// Sample all three sensors. Must not have side effects
    fn read_hall_state(&mut self) -> HallState;
}

/// Hall sensors wired to three GPIO inputs
pub struct HallPins<A, B, C> {
    a: A,
    b: B,
    c: C,
}

impl<A: InputPin, B: InputPin, C: InputPin> HallPins<A, B, C> {
    pub fn new(a: A, b: B, c: C) -> Self {
        Self { a, b, c }
    }
}

impl<A: InputPin, B: InputPin, C: InputPin> HallSensors for HallPins<A, B, C> {
    fn read_hall_state(&mut self) -> HallState {
        match (self.a.is_high(), self.b.is_high(), self.c.is_high()) {
            (Ok(a), Ok(b), Ok(c)) => HallState::new(a, b, c),
            // An unreadable pin is reported as a sensor fault so the motor coasts
            _ => HallState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[test]
    fn every_valid_triple_has_its_own_sector() {
        let mut seen = [false; 6];
        for bits in 0u8..8 {
            let hall = HallState::new(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            match decode_sector(hall) {
                Ok(sector) => {
                    assert!(!hall.is_fault());
                    assert!(!seen[sector.index()], "sector {sector:?} decoded twice");
                    seen[sector.index()] = true;
                    assert_eq!(sector.hall_state(), hall);
                }
                Err(HallFault(state)) => {
                    assert!(state.is_fault());
                    assert_eq!(state, hall);
                }
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn all_low_and_all_high_are_faults() {
        assert!(decode_sector(HallState::new(false, false, false)).is_err());
        assert!(decode_sector(HallState::new(true, true, true)).is_err());
    }

    #[test]
    fn forward_rotation_changes_one_sensor_per_step() {
        for sector in RotorSector::ALL {
            let here = sector.hall_state().bits();
            let there = sector.next().hall_state().bits();
            assert_eq!((here ^ there).count_ones(), 1);
            assert_eq!(sector.next().previous(), sector);
        }
    }

    struct FakePin(Result<bool, ()>);

    #[derive(Debug)]
    struct PinBroken;

    impl embedded_hal::digital::Error for PinBroken {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    impl ErrorType for FakePin {
        type Error = PinBroken;
    }

    impl InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            self.0.map_err(|_| PinBroken)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            self.0.map(|level| !level).map_err(|_| PinBroken)
        }
    }

    struct LevelPin(bool);

    impl ErrorType for LevelPin {
        type Error = Infallible;
    }

    impl InputPin for LevelPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0)
        }
    }

    #[test]
    fn pins_are_sampled_in_order() {
        let mut pins = HallPins::new(LevelPin(true), LevelPin(true), LevelPin(false));
        assert_eq!(pins.read_hall_state(), HallState::new(true, true, false));
    }

    #[test]
    fn unreadable_pin_reads_as_fault() {
        let mut pins = HallPins::new(FakePin(Ok(true)), FakePin(Err(())), FakePin(Ok(false)));
        assert!(pins.read_hall_state().is_fault());
    }
}
