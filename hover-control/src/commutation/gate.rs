use crate::{
    commutation::ControlConfig,
    hall::{HallFault, RotorSector},
    shared::MotionRequest,
    utils::{saturate_range, scale},
};

/// The three half bridges, named after the wire colours of a hoverboard motor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    G,
    B,
    Y,
}

/// What a single half bridge does.
///
/// A phase is either pulled high, pulled low or left floating, so the high and
/// low switch of one phase can never be on together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhaseDrive {
    #[default]
    Floating,
    High,
    Low,
}

impl PhaseDrive {
    pub const fn high_gate(self) -> bool {
        matches!(self, PhaseDrive::High)
    }

    pub const fn low_gate(self) -> bool {
        matches!(self, PhaseDrive::Low)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Gate outputs for one control cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateCommand {
    pub g: PhaseDrive,
    pub b: PhaseDrive,
    pub y: PhaseDrive,
    // PWM duty of the high side, 0..=ControlConfig::max_duty
    pub duty: u16,
}

impl GateCommand {
    pub const ALL_OFF: GateCommand = GateCommand {
        g: PhaseDrive::Floating,
        b: PhaseDrive::Floating,
        y: PhaseDrive::Floating,
        duty: 0,
    };

    pub fn is_all_off(&self) -> bool {
        *self == Self::ALL_OFF
    }

    pub fn drive(&self, phase: Phase) -> PhaseDrive {
        match phase {
            Phase::G => self.g,
            Phase::B => self.b,
            Phase::Y => self.y,
        }
    }

    fn set_drive(&mut self, phase: Phase, drive: PhaseDrive) {
        match phase {
            Phase::G => self.g = drive,
            Phase::B => self.b = drive,
            Phase::Y => self.y = drive,
        }
    }

    /// Gate levels in the order GH, GL, BH, BL, YH, YL
    pub fn gates(&self) -> [bool; 6] {
        [
            self.g.high_gate(),
            self.g.low_gate(),
            self.b.high_gate(),
            self.b.low_gate(),
            self.y.high_gate(),
            self.y.low_gate(),
        ]
    }
}

// (high phase, low phase) energised in every sector when turning forward
const FORWARD_PAIRS: [(Phase, Phase); 6] = [
    (Phase::G, Phase::B),
    (Phase::G, Phase::Y),
    (Phase::B, Phase::Y),
    (Phase::B, Phase::G),
    (Phase::Y, Phase::G),
    (Phase::Y, Phase::B),
];

/// The (high, low) phase pair for a sector and direction.
/// Reverse drives the same pair with the polarity swapped
pub fn phase_pair(sector: RotorSector, direction: Direction) -> (Phase, Phase) {
    let (high, low) = FORWARD_PAIRS[sector.index()];
    match direction {
        Direction::Forward => (high, low),
        Direction::Reverse => (low, high),
    }
}

/// Six step commutation.
///
/// The emergency flag wins over everything else. A Hall fault or a zero
/// speed coasts the motor.
pub fn compute_gate_command(
    sector: Result<RotorSector, HallFault>,
    request: &MotionRequest,
    emergency: bool,
    config: &ControlConfig,
) -> GateCommand {
    if emergency {
        return GateCommand::ALL_OFF;
    }

    let Ok(sector) = sector else {
        return GateCommand::ALL_OFF;
    };

    let speed = request.effective_speed();
    if speed == 0 || config.speed_full_scale == 0 {
        return GateCommand::ALL_OFF;
    }

    let mut direction = if speed > 0 {
        Direction::Forward
    } else {
        Direction::Reverse
    };
    if config.reverse_direction {
        direction = match direction {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        };
    }

    let magnitude = saturate_range(speed.unsigned_abs(), 0, config.speed_full_scale);
    let duty = scale(
        magnitude as i32,
        0,
        config.speed_full_scale as i32,
        0,
        config.max_duty as i32,
    );
    let duty = saturate_range(duty, 0, config.max_duty as i32) as u16;

    if duty == 0 {
        return GateCommand::ALL_OFF;
    }

    let (high, low) = phase_pair(sector, direction);
    let mut command = GateCommand {
        duty,
        ..GateCommand::ALL_OFF
    };
    command.set_drive(high, PhaseDrive::High);
    command.set_drive(low, PhaseDrive::Low);

    command
}
