use core::cell::Cell;

use cortex_m::peripheral::{syst::SystClkSource, SCB, SYST};
use critical_section::Mutex;
use hover_control::{
    config::CONTROL_LOOP_UPDATE_INTERVAL_US,
    timer::{Duration, Instant, TickCounter, Timer},
};

// IRC8M / 2 * 18, set up through the HAL in main
pub const CORE_CLOCK_HZ: u32 = 72_000_000;
pub const PWM_FREQUENCY_HZ: u32 = 16_000;

const SYSTICK_RELOAD: u32 = (CORE_CLOCK_HZ as u64 * CONTROL_LOOP_UPDATE_INTERVAL_US / 1_000_000) as u32 - 1;

static MICROS: Mutex<Cell<u64>> = Mutex::new(Cell::new(0));

/// SysTick at the control loop rate
pub fn start_control_tick(mut syst: SYST) -> SYST {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYSTICK_RELOAD);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
    syst
}

/// Advance the time base. Called from the SysTick exception
pub fn on_systick() {
    critical_section::with(|cs| {
        let micros = MICROS.borrow(cs);
        micros.set(micros.get() + CONTROL_LOOP_UPDATE_INTERVAL_US);
    });
}

/// Time base counted in control ticks
#[derive(Clone, Copy)]
pub struct SysTickTimer {}

impl SysTickTimer {
    pub fn new() -> Self {
        Self {}
    }
}

impl Timer for SysTickTimer {
    fn now(&self) -> Instant {
        critical_section::with(|cs| {
            let counted = MICROS.borrow(cs).get();
            let mut current = SYST::get_current();

            // The exception that counts a wrap is held off by this critical
            // section. Read the counter again once the wrap is seen
            let wrap_pending = SCB::is_pendst_pending();
            if wrap_pending {
                current = SYST::get_current();
            }

            TickCounter {
                counted: Duration::micros(counted),
                period: Duration::micros(CONTROL_LOOP_UPDATE_INTERVAL_US),
                reload: SYSTICK_RELOAD,
                current,
                wrap_pending,
            }
            .now()
        })
    }
}
