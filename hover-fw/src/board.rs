use gd32f1x0_hal::gpio::{Output, PushPull, Pxx};

pub type PushPullPin = Pxx<Output<PushPull>>;

/// One half bridge: the TIMER0 channel on its high side and the low side switch
pub struct PhasePins {
    pub high_channel: usize,
    pub low: PushPullPin,
}

/// The part of the pinout that differs between the board layouts
pub struct Pins {
    pub phase_g: PhasePins,
    pub phase_b: PhasePins,
    pub phase_y: PhasePins,
}

impl Pins {
    /// Low sides on PB13..=PB15 in TIMER0 channel order
    #[cfg(any(feature = "board_2_1_9", not(feature = "board_selected")))]
    pub fn new(pb13: PushPullPin, pb14: PushPullPin, pb15: PushPullPin) -> Self {
        Pins {
            phase_g: PhasePins {
                high_channel: 0,
                low: pb13,
            },
            phase_b: PhasePins {
                high_channel: 1,
                low: pb14,
            },
            phase_y: PhasePins {
                high_channel: 2,
                low: pb15,
            },
        }
    }

    // G and Y swapped compared to 2-1-9
    #[cfg(feature = "board_2_1_2")]
    pub fn new(pb13: PushPullPin, pb14: PushPullPin, pb15: PushPullPin) -> Self {
        Pins {
            phase_g: PhasePins {
                high_channel: 2,
                low: pb15,
            },
            phase_b: PhasePins {
                high_channel: 1,
                low: pb14,
            },
            phase_y: PhasePins {
                high_channel: 0,
                low: pb13,
            },
        }
    }
}
