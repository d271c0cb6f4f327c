use core::fmt::Debug;

use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};

use crate::commutation::gate::{GateCommand, Phase, PhaseDrive};

/// The three phase power stage
pub trait Bridge {
    type Error: Debug;

    /// Write one gate command to the hardware
    fn apply(&mut self, command: &GateCommand) -> Result<(), Self::Error>;

    /// Turn every gate off
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Let the stage drive again once the emergency latch is reset, for
    /// hardware that cut its own outputs
    fn rearm(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeError {
    HighSide(Phase),
    LowSide(Phase),
}

/// One phase: PWM on the high side, plain switch on the low side
pub struct HalfBridge<H, L> {
    phase: Phase,
    high: H,
    low: L,
}

impl<H: SetDutyCycle, L: OutputPin> HalfBridge<H, L> {
    pub fn new(phase: Phase, high: H, low: L) -> Self {
        Self { phase, high, low }
    }

    fn high_off(&mut self) -> Result<(), BridgeError> {
        self.high
            .set_duty_cycle_fully_off()
            .map_err(|_| BridgeError::HighSide(self.phase))
    }

    fn low_off(&mut self) -> Result<(), BridgeError> {
        self.low.set_low().map_err(|_| BridgeError::LowSide(self.phase))
    }

    /// Release whatever switch the new drive does not use
    fn release_unused(&mut self, drive: PhaseDrive) -> Result<(), BridgeError> {
        if !drive.high_gate() {
            self.high_off()?;
        }
        if !drive.low_gate() {
            self.low_off()?;
        }
        Ok(())
    }

    fn engage(&mut self, drive: PhaseDrive, duty: u16, max_duty: u16) -> Result<(), BridgeError> {
        match drive {
            PhaseDrive::High => self
                .high
                .set_duty_cycle_fraction(duty.min(max_duty), max_duty)
                .map_err(|_| BridgeError::HighSide(self.phase)),
            PhaseDrive::Low => self.low.set_high().map_err(|_| BridgeError::LowSide(self.phase)),
            PhaseDrive::Floating => Ok(()),
        }
    }
}

/// Six step bridge built from three PWM channels and three low side outputs
pub struct PwmBridge<GH, GL, BH, BL, YH, YL> {
    g: HalfBridge<GH, GL>,
    b: HalfBridge<BH, BL>,
    y: HalfBridge<YH, YL>,
    // Duty value in a GateCommand that means fully on
    max_duty: u16,
}

impl<GH, GL, BH, BL, YH, YL> PwmBridge<GH, GL, BH, BL, YH, YL>
where
    GH: SetDutyCycle,
    GL: OutputPin,
    BH: SetDutyCycle,
    BL: OutputPin,
    YH: SetDutyCycle,
    YL: OutputPin,
{
    pub fn new(
        g: HalfBridge<GH, GL>,
        b: HalfBridge<BH, BL>,
        y: HalfBridge<YH, YL>,
        max_duty: u16,
    ) -> Self {
        Self {
            g,
            b,
            y,
            max_duty: max_duty.max(1),
        }
    }
}

impl<GH, GL, BH, BL, YH, YL> Bridge for PwmBridge<GH, GL, BH, BL, YH, YL>
where
    GH: SetDutyCycle,
    GL: OutputPin,
    BH: SetDutyCycle,
    BL: OutputPin,
    YH: SetDutyCycle,
    YL: OutputPin,
{
    type Error = BridgeError;

    fn apply(&mut self, command: &GateCommand) -> Result<(), Self::Error> {
        // Everything that has to go off goes off before anything turns on
        self.g.release_unused(command.g)?;
        self.b.release_unused(command.b)?;
        self.y.release_unused(command.y)?;

        self.g.engage(command.g, command.duty, self.max_duty)?;
        self.b.engage(command.b, command.duty, self.max_duty)?;
        self.y.engage(command.y, command.duty, self.max_duty)?;

        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        // Keep going on errors so every switch that can be turned off is
        let results = [
            self.g.high_off(),
            self.b.high_off(),
            self.y.high_off(),
            self.g.low_off(),
            self.b.low_off(),
            self.y.low_off(),
        ];

        results.into_iter().collect()
    }
}
