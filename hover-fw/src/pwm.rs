//! TIMER0 as the high side PWM of the bridge.
//!
//! The HAL runs the timer and its compare channels. The break input is not
//! covered by the HAL, so its setup and flag handling go to the registers.
//! The break is routed to the emergency shutdown line: the hardware cuts the
//! outputs on its own and the break interrupt then trips the emergency latch.

use core::{cell::RefCell, convert::Infallible};

use critical_section::Mutex;
use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use gd32f1x0_hal::{
    pac::{GPIOB, TIMER0},
    pwm::{Channel, Pwm},
};
use hover_control::emergency::ShutdownInput;

pub type BridgePwm = Pwm<TIMER0>;

// Owned here once split, every channel only touches its own compare value
static PWM: Mutex<RefCell<Option<BridgePwm>>> = Mutex::new(RefCell::new(None));

// TIMER_DMAINTEN
const BRKIE: u32 = 1 << 7;
// TIMER_INTF
const BRKIF: u32 = 1 << 7;
// TIMER_CCHP
const BRKEN: u32 = 1 << 12;
const BRKP: u32 = 1 << 13;
const POEN: u32 = 1 << 15;
// PB12, TIMER0_BKIN
const BREAK_PIN: u32 = 1 << 12;

/// Start the three channels at zero duty and hand them out
pub fn split(mut pwm: BridgePwm) -> [PwmChannel; 3] {
    let channels = [Channel::C0, Channel::C1, Channel::C2];
    for channel in channels {
        pwm.set_duty(channel, 0);
        pwm.enable(channel);
    }

    let max_duty = pwm.get_max_duty();
    critical_section::with(|cs| PWM.borrow_ref_mut(cs).replace(pwm));

    channels.map(|channel| PwmChannel { channel, max_duty })
}

/// Active high break input that disables the outputs without software
pub fn enable_break() {
    let timer = unsafe { &*TIMER0::ptr() };
    timer.cchp().modify(|r, w| unsafe { w.bits(r.bits() | BRKEN | BRKP) });
    timer.intf().modify(|r, w| unsafe { w.bits(r.bits() & !BRKIF) });
    timer.dmainten().modify(|r, w| unsafe { w.bits(r.bits() | BRKIE) });
}

/// Clear the break flag. Returns whether it was set
pub fn take_break_flag() -> bool {
    let timer = unsafe { &*TIMER0::ptr() };
    let set = timer.intf().read().bits() & BRKIF != 0;
    if set {
        timer.intf().modify(|r, w| unsafe { w.bits(r.bits() & !BRKIF) });
    }
    set
}

/// Re-enable the outputs after a break. The hardware clears POEN on break
pub fn restore_outputs() {
    let timer = unsafe { &*TIMER0::ptr() };
    timer.cchp().modify(|r, w| unsafe { w.bits(r.bits() | POEN) });
}

/// One TIMER0 channel driving a high side switch
pub struct PwmChannel {
    channel: Channel,
    max_duty: u16,
}

impl ErrorType for PwmChannel {
    type Error = Infallible;
}

impl SetDutyCycle for PwmChannel {
    fn max_duty_cycle(&self) -> u16 {
        self.max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        critical_section::with(|cs| {
            if let Some(pwm) = PWM.borrow_ref_mut(cs).as_mut() {
                pwm.set_duty(self.channel, duty.min(self.max_duty));
            }
        });
        Ok(())
    }
}

/// The break input pin, high while the current is too high.
///
/// The pin is in its timer alternate function, the level is read straight
/// from the port.
pub struct BreakInput<P> {
    _pin: P,
}

impl<P> BreakInput<P> {
    pub fn new(pin: P) -> Self {
        Self { _pin: pin }
    }
}

impl<P> ShutdownInput for BreakInput<P> {
    fn is_asserted(&mut self) -> bool {
        let port = unsafe { &*GPIOB::ptr() };
        port.istat().read().bits() & BREAK_PIN != 0
    }
}
