//! The simulation loop.
//!
//! One call to [`SimulationDriver::step`] is one physics step:
//!
//! ```text
//! advance the scheduler
//!   -> control due?  read state, run the controllers, apply their commands
//!   -> integrate the physics over one timestep
//!   -> due sensors, due descriptors (state as of the end of the step)
//!   -> graphics due? refresh and record a frame (same end of step state)
//!   -> reset_commands? zero every actuation command
//! ```
//!
//! Commands computed on a control tick are applied before the integration of that
//! same step. Between control ticks the last commands are held.
//!
//! The driver is single threaded: it is stepped from one thread in a loop, the only
//! thing it shares with the outside world is its halt flag (see [`StopHandle`]).

use crate::config::{SimConfig, DEFAULT_GRAPHICS_FREQUENCY};
use crate::descriptor::{DescriptorId, Descriptors};
use crate::log::*;
use crate::scheduler::{Scheduler, TickDecision};
use crate::sensor::Sensor;
use robosim_clock::{RobotClock, SimDuration, SimTime};
use robosim_traits::{
    CommandMap, Graphics, Physics, SimError, SimErrorKind, SimResult, StateSnapshot,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A control law: `(time of the step start, state of the step start) -> commands`.
/// Only the dofs present in the returned map are updated.
pub type Controller = dyn FnMut(f64, &StateSnapshot) -> CommandMap + Send;

/// Shared halt flag of a driver, to stop `run` from a signal handler or another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Halts (`true`) or re-enables (`false`) the loop. Checked before every step of `run`.
    pub fn stop(&self, disable: bool) {
        self.0.store(disable, Ordering::SeqCst);
    }

    pub fn halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SimulationDriver<P: Physics> {
    physics: P,
    scheduler: Scheduler,
    graphics: Option<Box<dyn Graphics + Send>>,
    controllers: Vec<Box<Controller>>,
    commands: CommandMap,
    sensors: Vec<Box<dyn Sensor>>,
    descriptors: Descriptors,
    halt: StopHandle,
    failure: Option<SimError>,
    control_ticks: u64,
    graphics_ticks: u64,
}

impl<P: Physics> SimulationDriver<P> {
    /// A driver controlling at every physics step and refreshing graphics at 40 Hz.
    pub fn new(physics: P, timestep: f64) -> SimResult<Self> {
        Self::with_clock(physics, timestep, RobotClock::default())
    }

    /// Same as [`SimulationDriver::new`] with an explicit wall clock.
    pub fn with_clock(physics: P, timestep: f64, clock: RobotClock) -> SimResult<Self> {
        let mut scheduler = Scheduler::with_clock(timestep, clock)?;
        scheduler.set_control_frequency(scheduler.physics_frequency())?;
        scheduler.set_graphics_frequency(DEFAULT_GRAPHICS_FREQUENCY)?;
        info!(
            "simulation driver created, timestep {}",
            scheduler.sim_timestep()
        );
        Ok(SimulationDriver {
            physics,
            scheduler,
            graphics: None,
            controllers: Vec::new(),
            commands: CommandMap::new(),
            sensors: Vec::new(),
            descriptors: Descriptors::default(),
            halt: StopHandle::default(),
            failure: None,
            control_ticks: 0,
            graphics_ticks: 0,
        })
    }

    pub fn from_config(physics: P, config: &SimConfig) -> SimResult<Self> {
        config.validate()?;
        let mut driver = Self::new(physics, config.timestep)?;
        driver.set_control_frequency(config.effective_control_frequency())?;
        driver.set_graphics_frequency(config.graphics_frequency)?;
        driver.set_sync(config.sync_to_real_time);
        Ok(driver)
    }

    /// Changes the physics timestep and restarts simulated time at 0.
    pub fn set_timestep(&mut self, timestep: f64) -> SimResult<()> {
        self.scheduler.configure(timestep)
    }

    /// Returns the effective frequency, capped to the physics frequency.
    pub fn set_control_frequency(&mut self, hz: f64) -> SimResult<f64> {
        self.scheduler.set_control_frequency(hz)
    }

    /// Returns the effective frequency, capped to the physics frequency.
    pub fn set_graphics_frequency(&mut self, hz: f64) -> SimResult<f64> {
        self.scheduler.set_graphics_frequency(hz)
    }

    pub fn set_sync(&mut self, enable: bool) {
        self.scheduler.set_sync(enable);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    pub fn set_graphics(&mut self, graphics: impl Graphics + Send + 'static) {
        self.graphics = Some(Box::new(graphics));
    }

    pub fn remove_graphics(&mut self) -> Option<Box<dyn Graphics + Send>> {
        self.graphics.take()
    }

    pub fn graphics(&self) -> Option<&(dyn Graphics + Send)> {
        self.graphics.as_deref()
    }

    pub fn add_controller(
        &mut self,
        controller: impl FnMut(f64, &StateSnapshot) -> CommandMap + Send + 'static,
    ) {
        self.controllers.push(Box::new(controller));
    }

    pub fn clear_controllers(&mut self) {
        self.controllers.clear();
    }

    /// Commands currently held and applied to the physics.
    pub fn commands(&self) -> &CommandMap {
        &self.commands
    }

    /// Sets held commands directly, outside of any controller.
    pub fn set_commands(&mut self, commands: &CommandMap) {
        self.commands.merge(commands);
        self.physics.apply_commands(&self.commands);
    }

    /// Current state stamped with the current simulated time and step.
    pub fn state(&self) -> StateSnapshot {
        self.stamped_state()
    }

    /// Attaches a sensor and initializes it with the current state. Returns its index.
    pub fn add_sensor(&mut self, mut sensor: Box<dyn Sensor>) -> SimResult<usize> {
        // same validation as the ticks it will get.
        self.scheduler.schedule(sensor.frequency())?;
        sensor.init(&self.stamped_state())?;
        debug!("sensor {} attached at {} Hz", sensor.name(), sensor.frequency());
        self.sensors.push(sensor);
        Ok(self.sensors.len() - 1)
    }

    pub fn sensor(&self, index: usize) -> Option<&dyn Sensor> {
        self.sensors.get(index).map(|s| s.as_ref())
    }

    /// Detaches the sensor at `index`, the following ones shift down by one.
    pub fn remove_sensor(&mut self, index: usize) -> Option<Box<dyn Sensor>> {
        (index < self.sensors.len()).then(|| self.sensors.remove(index))
    }

    pub fn clear_sensors(&mut self) {
        self.sensors.clear();
    }

    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    /// Calls `describe(step, time, state)` after every step whose index is a multiple of `period`.
    pub fn add_descriptor(
        &mut self,
        period: u64,
        describe: impl FnMut(u64, f64, &StateSnapshot) -> SimResult<()> + Send + 'static,
    ) -> SimResult<DescriptorId> {
        self.descriptors.add(period, Box::new(describe))
    }

    pub fn remove_descriptor(&mut self, id: DescriptorId) -> bool {
        self.descriptors.remove(id)
    }

    pub fn clear_descriptors(&mut self) {
        self.descriptors.clear();
    }

    pub fn num_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    /// One physics step without any rendering.
    pub fn step_world(&mut self, reset_commands: bool) -> SimResult<()> {
        self.guarded(|driver| driver.world_step(reset_commands).map(|_| ()))
    }

    /// One physics step, then the graphics refresh when it is due.
    pub fn step(&mut self, reset_commands: bool) -> SimResult<()> {
        self.guarded(|driver| {
            let (decision, end_state) = driver.world_step(reset_commands)?;
            if decision.graphics_due {
                driver.refresh_graphics(&end_state)?;
            }
            Ok(())
        })
    }

    /// Steps until `max_duration` simulated seconds are reached, the driver is
    /// halted or the graphics report they are closed.
    pub fn run(&mut self, max_duration: f64, reset_commands: bool) -> SimResult<()> {
        if max_duration.is_nan() || max_duration < 0.0 {
            return Err(SimError::invalid_configuration(format!(
                "run duration must be >= 0 s, got {max_duration}"
            )));
        }
        // infinite or beyond the time range: only a halt or closed graphics end the run.
        let limit = SimDuration::from_secs_f64(max_duration).unwrap_or(SimDuration::MAX);
        info!("running the simulation for {}", limit);
        while !self.halted()
            && self.scheduler.current_sim_time() < limit
            && !self.graphics_closed()
        {
            self.step(reset_commands)?;
        }
        info!(
            "simulation stopped at {} after {} steps ({} control ticks, {} graphics ticks, real time factor {:.2})",
            self.scheduler.current_sim_time(),
            self.scheduler.step_count(),
            self.control_ticks,
            self.graphics_ticks,
            self.scheduler.real_time_factor()
        );
        Ok(())
    }

    /// Halts (`true`) or re-enables (`false`) the loop. A step in progress always completes.
    pub fn stop(&self, disable: bool) {
        self.halt.stop(disable);
    }

    pub fn halted(&self) -> bool {
        self.halt.halted()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.halt.clone()
    }

    /// False once a step failed; the driver then has to be rebuilt.
    pub fn is_usable(&self) -> bool {
        self.failure.is_none()
    }

    pub fn control_ticks(&self) -> u64 {
        self.control_ticks
    }

    pub fn graphics_ticks(&self) -> u64 {
        self.graphics_ticks
    }

    fn graphics_closed(&self) -> bool {
        self.graphics.as_ref().is_some_and(|g| g.is_closed())
    }

    fn stamped_state(&self) -> StateSnapshot {
        self.state_at(self.scheduler.step_count(), self.scheduler.current_sim_time())
    }

    fn state_at(&self, step: u64, time: SimTime) -> StateSnapshot {
        let mut state = self.physics.read_state();
        state.time = time;
        state.step = step;
        state
    }

    /// Refuses to step a failed driver and remembers the first failure.
    fn guarded<T>(&mut self, body: impl FnOnce(&mut Self) -> SimResult<T>) -> SimResult<T> {
        if let Some(failure) = &self.failure {
            return Err(SimError::new(
                SimErrorKind::Unusable,
                format!("the simulation already failed ({failure})"),
            ));
        }
        body(self).inspect_err(|e| {
            error!(
                "simulation failed at step {}: {}",
                self.scheduler.step_count(),
                e
            );
            self.failure = Some(e.shallow_clone());
        })
    }

    fn world_step(&mut self, reset_commands: bool) -> SimResult<(TickDecision, StateSnapshot)> {
        let step = self.scheduler.step_count();
        let start_time = self.scheduler.current_sim_time();
        let due_sensors = self
            .sensors
            .iter()
            .map(|s| self.scheduler.schedule(s.frequency()))
            .collect::<SimResult<Vec<bool>>>()?;

        let decision = self.scheduler.advance();
        trace!("step {step}: {decision:?}");

        if decision.control_due {
            self.control(step, start_time);
        }

        self.physics
            .integrate(self.scheduler.sim_timestep())
            .map_err(|e| {
                SimError::physics(format!("integration of step {step} failed")).with_cause(e)
            })?;

        let end_state = self.stamped_state();
        let end_time = self.scheduler.current_time();
        for (sensor, _) in self
            .sensors
            .iter_mut()
            .zip(due_sensors)
            .filter(|(_, due)| *due)
        {
            sensor.calculate(end_time, &end_state)?;
        }
        self.descriptors.describe(step, end_time, &end_state)?;

        if reset_commands {
            for dof in &end_state.dofs {
                self.commands.set(dof.name.as_str(), 0.0);
            }
            self.commands.zero_all();
            self.physics.apply_commands(&self.commands);
        }
        Ok((decision, end_state))
    }

    fn control(&mut self, step: u64, time: SimTime) {
        let state = self.state_at(step, time);
        for controller in self.controllers.iter_mut() {
            let update = controller(time.as_secs_f64(), &state);
            self.commands.merge(&update);
        }
        self.physics.apply_commands(&self.commands);
        self.control_ticks += 1;
    }

    fn refresh_graphics(&mut self, state: &StateSnapshot) -> SimResult<()> {
        if let Some(graphics) = self.graphics.as_mut().filter(|g| !g.is_closed()) {
            graphics.refresh(state)?;
            graphics.record_frame(state)?;
            self.graphics_ticks += 1;
        }
        Ok(())
    }
}
