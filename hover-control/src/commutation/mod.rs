pub mod bridge;
pub mod gate;

use log::{debug, error, info, warn};

use crate::{
    commutation::{
        bridge::Bridge,
        gate::{compute_gate_command, Direction, GateCommand},
    },
    config::*,
    emergency::{ResetError, ShutdownInput, ShutdownMonitor},
    hall::{decode_sector, HallSensors, RotorSector},
    shared::SharedState,
    timer::{elapsed, Duration, Timer},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    // Duty value that means fully on
    pub max_duty: u16,
    // Remote speed that maps to max_duty
    pub speed_full_scale: u16,
    pub reverse_direction: bool,
    // How often tick() is called
    pub control_period: Duration,
    // Released samples needed before the emergency latch can be reset
    pub emergency_release_ticks: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_duty: PWM_MAX_DUTY,
            speed_full_scale: SPEED_FULL_SCALE,
            reverse_direction: REVERSE_DIRECTION,
            control_period: Duration::micros(CONTROL_LOOP_UPDATE_INTERVAL_US),
            emergency_release_ticks: EMERGENCY_RELEASE_TICKS,
        }
    }
}

pub struct CommutationController<'a, H, B, S, T>
where
    H: HallSensors,
    B: Bridge,
    S: ShutdownInput,
    T: Timer,
{
    hall: H,
    bridge: B,
    shutdown: ShutdownMonitor<S>,
    timer: T,
    shared: &'a SharedState,
    config: ControlConfig,
    last_sector: Option<RotorSector>,
    rotation: Option<Direction>,
    // Electrical steps counted from the Hall transitions, forward positive
    steps: i32,
    stalled: bool,
    hall_faults: u32,
    overruns: u32,
    last_command: GateCommand,
}

impl<'a, H, B, S, T> CommutationController<'a, H, B, S, T>
where
    H: HallSensors,
    B: Bridge,
    S: ShutdownInput,
    T: Timer,
{
    pub fn new(
        hall: H,
        mut bridge: B,
        shutdown: S,
        timer: T,
        shared: &'a SharedState,
        config: ControlConfig,
    ) -> Self {
        info!("Commutation Controller Init");

        if let Err(err) = bridge.disable() {
            error!("Failed to disable the bridge at startup {:?}", err);
        }

        Self {
            hall,
            bridge,
            shutdown: ShutdownMonitor::new(shutdown, config.emergency_release_ticks),
            timer,
            shared,
            config,
            last_sector: None,
            rotation: None,
            steps: 0,
            stalled: true,
            hall_faults: 0,
            overruns: 0,
            last_command: GateCommand::ALL_OFF,
        }
    }

    /// One control cycle. Must be called every `control_period`
    pub fn tick(&mut self) -> GateCommand {
        let start = self.timer.now();

        // The shutdown line goes first, it may trip the latch
        self.shutdown.sample(self.shared.emergency());

        let hall = self.hall.read_hall_state();
        let sector = decode_sector(hall);
        self.track_sector(sector.ok());

        let request = self.shared.motion_request(start);

        let mut command = compute_gate_command(
            sector,
            &request,
            self.shared.emergency().is_tripped(),
            &self.config,
        );

        // The latch may have been tripped by an interrupt since it was read
        if self.shared.emergency().is_tripped() {
            command = GateCommand::ALL_OFF;
        }

        self.write(command);

        let duration = elapsed(self.timer.now(), start);
        if duration > self.config.control_period {
            self.overruns = self.overruns.wrapping_add(1);
            error!(
                "Tick took longer than the control period {} > {} us",
                duration.to_micros(),
                self.config.control_period.to_micros()
            );
        }

        command
    }

    fn write(&mut self, command: GateCommand) {
        if let Err(err) = self.bridge.apply(&command) {
            error!("Failed to write the gate command {:?}", err);
            if let Err(err) = self.bridge.disable() {
                error!("Failed to disable the bridge {:?}", err);
            }
            self.last_command = GateCommand::ALL_OFF;
            return;
        }

        if command != self.last_command {
            debug!("Gates {:?}", command);
        }
        self.last_command = command;
    }

    fn track_sector(&mut self, sector: Option<RotorSector>) {
        match (self.last_sector, sector) {
            (_, None) => {
                if !self.stalled {
                    warn!("Invalid Hall reading. Coasting until a valid one is seen");
                }
                self.hall_faults = self.hall_faults.wrapping_add(1);
                self.stalled = true;
                self.rotation = None;
            }
            (Some(last), Some(current)) if last != current => {
                if current == last.next() {
                    self.steps = self.steps.wrapping_add(1);
                    self.rotation = Some(Direction::Forward);
                } else if current == last.previous() {
                    self.steps = self.steps.wrapping_sub(1);
                    self.rotation = Some(Direction::Reverse);
                } else {
                    // Skipped a sector, the tick was too slow or a sensor glitched
                    debug!("Hall jumped from {:?} to {:?}", last, current);
                    self.rotation = None;
                }
                self.stalled = false;
            }
            (_, Some(_)) => {
                if self.stalled {
                    info!("Valid Hall reading");
                }
                self.stalled = false;
            }
        }

        if sector.is_some() {
            self.last_sector = sector;
        }
    }

    /// Clear the emergency latch if the shutdown input allows it, then re-arm the bridge
    pub fn reset_emergency(&mut self) -> Result<(), ResetError> {
        self.shutdown.try_reset(self.shared.emergency())?;

        if let Err(err) = self.bridge.rearm() {
            error!("Failed to re-arm the bridge {:?}", err);
        }
        Ok(())
    }

    pub fn emergency_active(&self) -> bool {
        self.shared.emergency().is_tripped()
    }

    /// Stalled until a valid Hall reading is seen
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn sector(&self) -> Option<RotorSector> {
        self.last_sector
    }

    /// Direction of the last Hall transition
    pub fn rotation(&self) -> Option<Direction> {
        self.rotation
    }

    pub fn steps(&self) -> i32 {
        self.steps
    }

    pub fn hall_faults(&self) -> u32 {
        self.hall_faults
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn last_command(&self) -> GateCommand {
        self.last_command
    }
}
