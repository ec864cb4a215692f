//! Decides, for every physics step, whether the control and graphics updates are due.
//!
//! Time is counted in whole steps of an integer nanosecond timestep, and ticks are
//! derived from the number of elapsed periods since the channel was (re)configured:
//!
//! ```text
//! periods(k) = floor(k * timestep_ns * frequency_uhz / 10^15)
//! due(k)     = k == 0 || periods(k) > periods(k - 1)
//! ```
//!
//! Nothing is accumulated in floating point, so a long run never drifts: over any
//! window of `N` steps where `N * timestep` is a multiple of the period, exactly
//! `N * timestep * frequency` ticks fire.
//!
//! A frequency above the physics frequency (`1 / timestep`) cannot be honoured.
//! It is capped to the physics frequency (one tick per step), the effective value
//! is returned by the setter and a warning is logged.

use crate::log::*;
use robosim_clock::{RobotClock, SimDuration, SimTime};
use robosim_traits::{SimError, SimResult};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MICROS_PER_UNIT: f64 = 1_000_000.0;
// timestep in ns times frequency in µHz gives 10^15 per elapsed period.
const PERIOD_SCALE: u128 = NANOS_PER_SEC * 1_000_000;
// relative slack when comparing a requested frequency with the physics frequency.
const CAP_TOLERANCE: f64 = 1e-9;

/// Outcome of one [`Scheduler::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickDecision {
    pub control_due: bool,
    pub graphics_due: bool,
}

/// Effective rate of a periodic channel once validated against the timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rate {
    Disabled,
    /// At or above the physics frequency: one tick per step.
    EveryStep,
    MicroHertz(u64),
}

impl Rate {
    fn is_due(&self, steps_since_origin: u64, timestep: SimDuration) -> bool {
        match *self {
            Rate::Disabled => false,
            Rate::EveryStep => true,
            Rate::MicroHertz(uhz) => {
                if steps_since_origin == 0 {
                    return true;
                }
                let periods = |k: u64| {
                    k as u128 * timestep.as_nanos() as u128 * uhz as u128 / PERIOD_SCALE
                };
                periods(steps_since_origin) > periods(steps_since_origin - 1)
            }
        }
    }

    fn hertz(&self, timestep: SimDuration) -> f64 {
        match *self {
            Rate::Disabled => 0.0,
            Rate::EveryStep => 1.0 / timestep.as_secs_f64(),
            Rate::MicroHertz(uhz) => uhz as f64 / MICROS_PER_UNIT,
        }
    }
}

/// Validates `hz` and turns it into a [`Rate`], capping it to the physics frequency.
/// The boolean is true when the request had to be capped.
fn rate_for(hz: f64, timestep: SimDuration) -> SimResult<(Rate, bool)> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(SimError::invalid_configuration(format!(
            "frequency must be a finite value >= 0, got {hz}"
        )));
    }
    if hz == 0.0 {
        return Ok((Rate::Disabled, false));
    }
    let physics_hz = 1.0 / timestep.as_secs_f64();
    if hz >= physics_hz * (1.0 - CAP_TOLERANCE) {
        let capped = hz > physics_hz * (1.0 + CAP_TOLERANCE);
        return Ok((Rate::EveryStep, capped));
    }
    let uhz = (hz * MICROS_PER_UNIT).round() as u64;
    if uhz == 0 {
        return Err(SimError::invalid_configuration(format!(
            "frequency {hz} Hz is below the 1 µHz resolution, use 0 to disable the channel"
        )));
    }
    Ok((Rate::MicroHertz(uhz), false))
}

fn timestep_from_secs(timestep: f64) -> SimResult<SimDuration> {
    match SimDuration::from_secs_f64(timestep) {
        Some(dt) if !dt.is_zero() => Ok(dt),
        _ => Err(SimError::invalid_configuration(format!(
            "timestep must be > 0 and at least 1ns, got {timestep}"
        ))),
    }
}

/// One periodic channel (control or graphics).
#[derive(Debug, Clone)]
struct Channel {
    name: &'static str,
    requested: f64,
    rate: Rate,
    // step from which periods are counted, moved on every effective change.
    origin_step: u64,
}

impl Channel {
    fn new(name: &'static str) -> Self {
        Channel {
            name,
            requested: 0.0,
            rate: Rate::Disabled,
            origin_step: 0,
        }
    }

    fn set(&mut self, hz: f64, timestep: SimDuration, current_step: u64) -> SimResult<f64> {
        let (rate, capped) = rate_for(hz, timestep)?;
        let effective = rate.hertz(timestep);
        if capped {
            warn!(
                "{} frequency {} Hz exceeds the physics frequency, capped to {} Hz (one tick per step)",
                self.name, hz, effective
            );
        }
        if rate != self.rate {
            self.origin_step = current_step;
        }
        self.requested = hz;
        self.rate = rate;
        Ok(effective)
    }

    fn is_due(&self, step: u64, timestep: SimDuration) -> bool {
        self.rate.is_due(step.saturating_sub(self.origin_step), timestep)
    }
}

/// Wall clock bookkeeping, used for real-time sync and reporting.
#[derive(Debug, Clone)]
struct WallTiming {
    clock: RobotClock,
    start: Option<SimTime>,
    last: Option<SimTime>,
    last_it: SimDuration,
    total_it: SimDuration,
    iterations: u64,
}

impl WallTiming {
    fn new(clock: RobotClock) -> Self {
        WallTiming {
            clock,
            start: None,
            last: None,
            last_it: SimDuration::ZERO,
            total_it: SimDuration::ZERO,
            iterations: 0,
        }
    }

    fn reset(&mut self) {
        *self = WallTiming::new(self.clock.clone());
    }

    fn elapsed(&self) -> SimDuration {
        match self.start {
            Some(start) => self.clock.now().saturating_sub(start),
            None => SimDuration::ZERO,
        }
    }
}

/// Fixed-timestep scheduler for the physics, control and graphics updates.
///
/// Not internally synchronized: the owner calls [`Scheduler::advance`] once per
/// physics step from one thread, and reconfigures it only between steps.
#[derive(Debug, Clone)]
pub struct Scheduler {
    timestep: SimDuration,
    step_count: u64,
    control: Channel,
    graphics: Channel,
    sync: bool,
    wall: WallTiming,
}

impl Scheduler {
    /// Builds a scheduler with both channels disabled.
    pub fn new(timestep: f64) -> SimResult<Self> {
        Self::with_clock(timestep, RobotClock::default())
    }

    /// Same as [`Scheduler::new`] with an explicit wall clock (a mock in tests).
    pub fn with_clock(timestep: f64, clock: RobotClock) -> SimResult<Self> {
        let timestep = timestep_from_secs(timestep)?;
        Ok(Scheduler {
            timestep,
            step_count: 0,
            control: Channel::new("control"),
            graphics: Channel::new("graphics"),
            sync: false,
            wall: WallTiming::new(clock),
        })
    }

    /// Sets the physics timestep and restarts the timeline at 0.
    /// Stored frequencies are re-validated against the new timestep.
    pub fn configure(&mut self, timestep: f64) -> SimResult<()> {
        let timestep = timestep_from_secs(timestep)?;
        // validate both channels before touching anything.
        rate_for(self.control.requested, timestep)?;
        rate_for(self.graphics.requested, timestep)?;
        self.timestep = timestep;
        self.reset();
        let control_hz = self.control.requested;
        let graphics_hz = self.graphics.requested;
        self.control.set(control_hz, timestep, 0)?;
        self.graphics.set(graphics_hz, timestep, 0)?;
        info!("scheduler configured with a {} timestep", self.timestep);
        Ok(())
    }

    /// Puts the timeline back at 0, keeping timestep and frequencies.
    pub fn reset(&mut self) {
        self.step_count = 0;
        self.control.origin_step = 0;
        self.graphics.origin_step = 0;
        self.wall.reset();
    }

    /// Sets the number of control updates per simulated second, 0 disables them.
    /// Returns the effective frequency, which is capped to the physics frequency.
    pub fn set_control_frequency(&mut self, hz: f64) -> SimResult<f64> {
        self.control.set(hz, self.timestep, self.step_count)
    }

    /// Sets the number of graphics updates per simulated second, 0 disables them.
    /// Returns the effective frequency, which is capped to the physics frequency.
    pub fn set_graphics_frequency(&mut self, hz: f64) -> SimResult<f64> {
        self.graphics.set(hz, self.timestep, self.step_count)
    }

    /// Registers one physics step and tells which updates are due on it.
    pub fn advance(&mut self) -> TickDecision {
        let step = self.step_count;
        let decision = TickDecision {
            control_due: self.control.is_due(step, self.timestep),
            graphics_due: self.graphics.is_due(step, self.timestep),
        };
        self.step_count += 1;
        self.track_wall_time();
        decision
    }

    /// Would a periodic action at `hz`, anchored at step 0, be due on the step about to run?
    pub fn schedule(&self, hz: f64) -> SimResult<bool> {
        let (rate, _) = rate_for(hz, self.timestep)?;
        Ok(rate.is_due(self.step_count, self.timestep))
    }

    fn track_wall_time(&mut self) {
        let now = self.wall.clock.now();
        let start = *self.wall.start.get_or_insert(now);
        if let Some(last) = self.wall.last {
            self.wall.last_it = now.saturating_sub(last);
            self.wall.total_it += self.wall.last_it;
            self.wall.iterations += 1;
        }
        self.wall.last = Some(now);

        if self.sync {
            // the first step starts the wall clock, simulated time is one step ahead of it.
            let ahead = self.current_sim_time().saturating_sub(self.timestep);
            let wall = now.saturating_sub(start);
            if ahead > wall {
                let lag: Duration = (ahead - wall).into();
                self.wall.clock.sleep(lag);
            }
        }
    }

    pub fn timestep(&self) -> f64 {
        self.timestep.as_secs_f64()
    }

    pub fn sim_timestep(&self) -> SimDuration {
        self.timestep
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Simulated seconds since the start, `step_count * timestep`.
    pub fn current_time(&self) -> f64 {
        self.current_sim_time().as_secs_f64()
    }

    pub fn current_sim_time(&self) -> SimTime {
        self.timestep * self.step_count
    }

    /// Simulated time after the next [`Scheduler::advance`].
    pub fn next_time(&self) -> f64 {
        (self.timestep * (self.step_count + 1)).as_secs_f64()
    }

    pub fn physics_frequency(&self) -> f64 {
        1.0 / self.timestep.as_secs_f64()
    }

    /// Effective control frequency, after capping.
    pub fn control_frequency(&self) -> f64 {
        self.control.rate.hertz(self.timestep)
    }

    /// Effective graphics frequency, after capping.
    pub fn graphics_frequency(&self) -> f64 {
        self.graphics.rate.hertz(self.timestep)
    }

    /// When enabled, `advance` sleeps so simulated time never runs ahead of wall time.
    pub fn set_sync(&mut self, enable: bool) {
        self.sync = enable;
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    /// Wall seconds elapsed since the first `advance`.
    pub fn real_time(&self) -> f64 {
        self.wall.elapsed().as_secs_f64()
    }

    /// Simulated time over wall time, 0 until wall time is measurable.
    pub fn real_time_factor(&self) -> f64 {
        let wall = self.real_time();
        if wall <= 0.0 {
            return 0.0;
        }
        self.current_time() / wall
    }

    /// Average wall seconds between two `advance` calls.
    pub fn it_duration(&self) -> f64 {
        if self.wall.iterations == 0 {
            return 0.0;
        }
        (self.wall.total_it / self.wall.iterations).as_secs_f64()
    }

    pub fn last_it_duration(&self) -> f64 {
        self.wall.last_it.as_secs_f64()
    }
}
