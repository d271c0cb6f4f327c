#![no_std]
#![no_main]

#[cfg(not(feature = "board_selected"))]
compile_error!("No board selected!");

mod board;
mod clock;
mod pwm;

use core::cell::RefCell;

use cortex_m::{asm, peripheral::NVIC};
use cortex_m_rt::{entry, exception};
use critical_section::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};
use gd32f1x0_hal::{
    gpio::{
        gpioa::{PA0, PA1},
        gpiob::{PB11, PB12},
        Alternate, Input, PullUp, AF2,
    },
    pac::{self, interrupt, Interrupt},
    prelude::*,
    pwm::Pwm,
};
use log::{info, warn};
use panic_halt as _;

use hover_control::{
    commutation::{
        bridge::{Bridge, BridgeError, HalfBridge, PwmBridge},
        gate::{GateCommand, Phase},
        CommutationController, ControlConfig,
    },
    config::LOST_CONNECTION_STOP_MILLIS,
    hall::HallPins,
    shared::{RemoteState, SharedState},
    timer::{Duration, Timer},
};

use crate::{
    board::{PhasePins, Pins, PushPullPin},
    clock::{SysTickTimer, CORE_CLOCK_HZ, PWM_FREQUENCY_HZ},
    pwm::{BreakInput, PwmChannel},
};

#[cfg(feature = "master_or_single")]
use self::link::LINK;

type Hall = HallPins<PA0<Input<PullUp>>, PA1<Input<PullUp>>, PB11<Input<PullUp>>>;
type Shutdown = BreakInput<PB12<Alternate<AF2>>>;
type Controller = CommutationController<'static, Hall, BoardBridge, Shutdown, SysTickTimer>;

static SHARED: SharedState = SharedState::new(Duration::millis(LOST_CONNECTION_STOP_MILLIS));

static CONTROLLER: Mutex<RefCell<Option<Controller>>> = Mutex::new(RefCell::new(None));

/// The six step bridge plus the TIMER0 output enable that a break clears
struct BoardBridge(PwmBridge<PwmChannel, PushPullPin, PwmChannel, PushPullPin, PwmChannel, PushPullPin>);

impl Bridge for BoardBridge {
    type Error = BridgeError;

    fn apply(&mut self, command: &GateCommand) -> Result<(), Self::Error> {
        self.0.apply(command)
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        self.0.disable()
    }

    fn rearm(&mut self) -> Result<(), Self::Error> {
        pwm::restore_outputs();
        Ok(())
    }
}

struct Leds {
    green: PushPullPin,
    orange: PushPullPin,
    red: PushPullPin,
    upper: PushPullPin,
    lower: PushPullPin,
}

impl Leds {
    /// Follow the flags sent by the remote, red is forced on during an emergency
    fn show(&mut self, state: RemoteState, emergency: bool) {
        let set = |pin: &mut PushPullPin, on: bool| {
            let _ = if on { pin.set_high() } else { pin.set_low() };
        };

        set(&mut self.green, state.contains(RemoteState::LED_GREEN));
        set(&mut self.orange, state.contains(RemoteState::LED_ORANGE));
        set(&mut self.red, emergency || state.contains(RemoteState::LED_RED));
        set(&mut self.upper, state.contains(RemoteState::LED_UP));
        set(&mut self.lower, state.contains(RemoteState::LED_DOWN));
    }
}

fn half_bridge(phase: Phase, pins: PhasePins, channels: &mut [Option<PwmChannel>; 3]) -> HalfBridge<PwmChannel, PushPullPin> {
    let high = channels[pins.high_channel]
        .take()
        .expect("PWM channel used twice in the pin table");

    HalfBridge::new(phase, high, pins.low)
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().expect("Peripherals taken twice");
    let cp = cortex_m::Peripherals::take().expect("Core peripherals taken twice");

    let mut rcu = dp.RCU.constrain();
    let mut flash = dp.FMC.constrain();
    let clocks = rcu.cfgr.sysclk(CORE_CLOCK_HZ.hz()).freeze(&mut flash.ws);

    let mut gpioa = dp.GPIOA.split(&mut rcu.ahb);
    let mut gpiob = dp.GPIOB.split(&mut rcu.ahb);
    let mut gpioc = dp.GPIOC.split(&mut rcu.ahb);

    // Keep the board powered once the button is released
    let mut self_hold = gpiob.pb2.into_push_pull_output(&mut gpiob.config).downgrade();
    let _ = self_hold.set_high();
    let mut button = gpioc.pc14.into_floating_input(&mut gpioc.config);

    info!("Welcome to hover-fw");
    info!("Version: {}", env!("VERGEN_GIT_DESCRIBE"));

    #[cfg(feature = "board_2_1_9")]
    info!("Board: 2-1-9");
    #[cfg(feature = "board_2_1_2")]
    info!("Board: 2-1-2");

    let hall = HallPins::new(
        gpioa.pa0.into_pull_up_input(&mut gpioa.config),
        gpioa.pa1.into_pull_up_input(&mut gpioa.config),
        gpiob.pb11.into_pull_up_input(&mut gpiob.config),
    );

    let mut leds = Leds {
        green: gpiob.pb3.into_push_pull_output(&mut gpiob.config).downgrade(),
        orange: gpiob.pb5.into_push_pull_output(&mut gpiob.config).downgrade(),
        red: gpiob.pb8.into_push_pull_output(&mut gpiob.config).downgrade(),
        upper: gpioa.pa15.into_push_pull_output(&mut gpioa.config).downgrade(),
        lower: gpiob.pb4.into_push_pull_output(&mut gpiob.config).downgrade(),
    };

    // Low sides start low, the bridge must be off before the timer drives any pin
    let pins = Pins::new(
        gpiob.pb13.into_push_pull_output(&mut gpiob.config).downgrade(),
        gpiob.pb14.into_push_pull_output(&mut gpiob.config).downgrade(),
        gpiob.pb15.into_push_pull_output(&mut gpiob.config).downgrade(),
    );

    let high_sides = (
        gpioa.pa8.into_alternate::<AF2>(&mut gpioa.config),
        gpioa.pa9.into_alternate::<AF2>(&mut gpioa.config),
        gpioa.pa10.into_alternate::<AF2>(&mut gpioa.config),
    );
    let pwm = Pwm::new(dp.TIMER0, high_sides, &clocks, &mut rcu.apb2, PWM_FREQUENCY_HZ.hz());
    let mut channels = pwm::split(pwm).map(Some);

    let config = ControlConfig::default();
    let bridge = BoardBridge(PwmBridge::new(
        half_bridge(Phase::G, pins.phase_g, &mut channels),
        half_bridge(Phase::B, pins.phase_b, &mut channels),
        half_bridge(Phase::Y, pins.phase_y, &mut channels),
        config.max_duty,
    ));

    let shutdown = BreakInput::new(gpiob.pb12.into_alternate::<AF2>(&mut gpiob.config));
    pwm::enable_break();

    let timer = SysTickTimer::new();
    let controller = CommutationController::new(hall, bridge, shutdown, timer, &SHARED, config);
    critical_section::with(|cs| CONTROLLER.borrow_ref_mut(cs).replace(controller));

    #[cfg(feature = "master_or_single")]
    let mut answerer = link::init(
        dp.USART1,
        (
            gpioa.pa2.into_alternate(&mut gpioa.config),
            gpioa.pa3.into_alternate(&mut gpioa.config),
        ),
        dp.ADC,
        gpioa.pa4.into_analog(&mut gpioa.config),
        &clocks,
        &mut rcu.apb1,
        &mut rcu.apb2,
    );

    let _syst = clock::start_control_tick(cp.SYST);
    unsafe {
        NVIC::unmask(Interrupt::TIMER0_BRK_UP_TRG_COM);
        #[cfg(feature = "master_or_single")]
        NVIC::unmask(Interrupt::USART1);
    }

    let mut button_was_released = false;

    loop {
        let now = timer.now();

        #[cfg(feature = "master_or_single")]
        {
            critical_section::with(|cs| {
                if let Some(link) = LINK.borrow_ref_mut(cs).as_mut() {
                    link.poll(now);
                }
            });
            answerer.send_if_due(now);
        }

        let request = SHARED.motion_request(now);
        leds.show(request.state, SHARED.emergency().is_tripped());

        // The button is still held from switching on until it is first released
        let pressed = button.is_high().unwrap_or(false);
        if !pressed {
            button_was_released = true;
        }

        if request.state.power_off_requested() {
            power_off(&mut self_hold);
        }

        // During an emergency the button asks for a reset instead of powering off
        if pressed && button_was_released {
            if SHARED.emergency().is_tripped() {
                reset_emergency();
                button_was_released = false;
            } else {
                power_off(&mut self_hold);
            }
        }

        asm::wfi();
    }
}

fn reset_emergency() {
    critical_section::with(|cs| {
        if let Some(controller) = CONTROLLER.borrow_ref_mut(cs).as_mut() {
            match controller.reset_emergency() {
                // The controller re-arms the TIMER0 outputs the break cleared
                Ok(()) => info!("Emergency reset"),
                Err(err) => warn!("Emergency reset refused {:?}", err),
            }
        }
    });
}

fn power_off(self_hold: &mut PushPullPin) -> ! {
    warn!("Powering off");

    // Latch all gates off before the supply goes away
    SHARED.emergency().trip();
    run_tick();

    let _ = self_hold.set_low();
    loop {
        asm::wfi();
    }
}

fn run_tick() {
    critical_section::with(|cs| {
        if let Some(controller) = CONTROLLER.borrow_ref_mut(cs).as_mut() {
            controller.tick();
        }
    });
}

// Control tick
#[exception]
fn SysTick() {
    clock::on_systick();
    run_tick();
}

// Short circuit. The hardware already cut the PWM outputs, the low sides are
// plain outputs the break does not reach, so they go off with an extra tick
#[interrupt]
fn TIMER0_BRK_UP_TRG_COM() {
    if pwm::take_break_flag() {
        SHARED.emergency().trip();
        run_tick();
    }
}

#[cfg(feature = "master_or_single")]
mod link {
    //! USART1 to the steering device: commands in through the receive
    //! interrupt, one feedback frame out for every applied command.

    use core::cell::RefCell;

    use critical_section::Mutex;
    use embedded_hal_nb::serial::{Read, Write};
    use gd32f1x0_hal::{
        adc::Adc,
        gpio::{
            gpioa::{PA2, PA3, PA4},
            Alternate, Analog, AF1,
        },
        pac::{interrupt, ADC, USART1},
        prelude::*,
        rcu::{Clocks, APB1, APB2},
        serial::{Config, Event, Rx, Serial, Tx},
    };
    use hover_control::{
        remote::{LinkConfig, RemoteLink},
        timer::{elapsed, Instant, Timer},
        utils::{battery_centivolts, steps_per_second},
    };

    use crate::{clock::SysTickTimer, CONTROLLER, SHARED};

    pub static LINK: Mutex<RefCell<Option<RemoteLink<'static>>>> = Mutex::new(RefCell::new(None));
    static RX: Mutex<RefCell<Option<Rx<USART1>>>> = Mutex::new(RefCell::new(None));

    pub fn init(
        usart: USART1,
        pins: (PA2<Alternate<AF1>>, PA3<Alternate<AF1>>),
        adc: ADC,
        vbatt: PA4<Analog>,
        clocks: &Clocks,
        apb1: &mut APB1,
        apb2: &mut APB2,
    ) -> Answerer {
        let config = LinkConfig::default();

        let mut serial = Serial::usart(usart, pins, Config::default().baudrate(config.baud.bps()), *clocks, apb1);
        serial.listen(Event::Rbne);
        let (tx, rx) = serial.split();

        let link = RemoteLink::new(&SHARED, config);
        critical_section::with(|cs| {
            LINK.borrow_ref_mut(cs).replace(link);
            RX.borrow_ref_mut(cs).replace(rx);
        });

        Answerer {
            tx,
            adc: Adc::new(adc, apb2, *clocks),
            vbatt,
            last_answer: SysTickTimer::new().now(),
            last_steps: 0,
        }
    }

    /// Sends the feedback frames from the main loop, the receive interrupt only queues them
    pub struct Answerer {
        tx: Tx<USART1>,
        adc: Adc,
        vbatt: PA4<Analog>,
        last_answer: Instant,
        last_steps: i32,
    }

    impl Answerer {
        pub fn send_if_due(&mut self, now: Instant) {
            let due = critical_section::with(|cs| {
                LINK.borrow_ref_mut(cs)
                    .as_mut()
                    .is_some_and(|link| link.take_answer_due())
            });
            if !due {
                return;
            }

            let steps = critical_section::with(|cs| CONTROLLER.borrow_ref(cs).as_ref().map(|c| c.steps()))
                .unwrap_or_default();
            let speed = steps_per_second(steps.wrapping_sub(self.last_steps), elapsed(now, self.last_answer));
            self.last_steps = steps;
            self.last_answer = now;

            let raw: u16 = nb::block!(self.adc.read(&mut self.vbatt)).unwrap_or_default();

            // No current sense on this board layout
            let frame = critical_section::with(|cs| {
                LINK.borrow_ref(cs)
                    .as_ref()
                    .map(|link| link.answer(speed, battery_centivolts(raw), 0, steps))
            });

            for byte in frame.into_iter().flatten() {
                let _ = nb::block!(self.tx.write(byte));
            }
        }
    }

    #[interrupt]
    fn USART1() {
        let timer = SysTickTimer::new();

        critical_section::with(|cs| {
            let mut rx = RX.borrow_ref_mut(cs);
            let mut link = LINK.borrow_ref_mut(cs);
            let (Some(rx), Some(link)) = (rx.as_mut(), link.as_mut()) else {
                return;
            };

            loop {
                match rx.read() {
                    Ok(byte) => {
                        link.on_byte(byte, timer.now());
                    }
                    Err(nb::Error::WouldBlock) => break,
                    // An overrun drops the byte in flight, the frame checks catch the damage
                    Err(nb::Error::Other(_)) => {}
                }
            }
        });
    }
}
