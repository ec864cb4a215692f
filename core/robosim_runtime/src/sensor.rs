//! Sensors attached to a simulation.
//!
//! A sensor is refreshed after the physics integration of every step where a
//! tick at its own frequency is due, anchored at step 0 (see [`Scheduler::schedule`]).
//!
//! [`Scheduler::schedule`]: crate::scheduler::Scheduler::schedule

use robosim_traits::{SimError, SimResult, StateSnapshot};
use std::any::Any;

pub trait Sensor: Send {
    fn name(&self) -> &str;

    /// Refreshes per simulated second. 0 never refreshes the sensor.
    fn frequency(&self) -> f64;

    /// Called once when the sensor is attached, with the state at that time.
    fn init(&mut self, _state: &StateSnapshot) -> SimResult<()> {
        Ok(())
    }

    /// Computes a new reading from the state at the end of the current step.
    fn calculate(&mut self, time: f64, state: &StateSnapshot) -> SimResult<()>;

    /// To get the concrete sensor back from [`crate::driver::SimulationDriver::sensor`].
    fn as_any(&self) -> &dyn Any;
}

/// Reads the position and velocity of one dof, the simplest sensor there is.
#[derive(Debug, Clone)]
pub struct DofSensor {
    name: String,
    dof: String,
    frequency: f64,
    last: Option<(f64, f64, f64)>,
    readings: u64,
}

impl DofSensor {
    pub fn new(name: impl Into<String>, dof: impl Into<String>, frequency: f64) -> Self {
        DofSensor {
            name: name.into(),
            dof: dof.into(),
            frequency,
            last: None,
            readings: 0,
        }
    }

    /// `(time, position, velocity)` of the last reading.
    pub fn last_reading(&self) -> Option<(f64, f64, f64)> {
        self.last
    }

    pub fn readings(&self) -> u64 {
        self.readings
    }
}

impl Sensor for DofSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn init(&mut self, _state: &StateSnapshot) -> SimResult<()> {
        self.last = None;
        self.readings = 0;
        Ok(())
    }

    fn calculate(&mut self, time: f64, state: &StateSnapshot) -> SimResult<()> {
        let dof = state.dof(&self.dof).ok_or_else(|| {
            SimError::graphics(format!(
                "sensor {}: no dof named {} in the simulated state",
                self.name, self.dof
            ))
        })?;
        self.last = Some((time, dof.position, dof.velocity));
        self.readings += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robosim_traits::{DofState, SimErrorKind};

    fn state(position: f64) -> StateSnapshot {
        StateSnapshot {
            dofs: vec![DofState {
                name: "hip".into(),
                position,
                velocity: 2.0,
                command: 0.0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_dof_sensor_reading() {
        let mut sensor = DofSensor::new("hip_encoder", "hip", 100.0);
        sensor.init(&state(0.0)).unwrap();
        assert!(sensor.last_reading().is_none());
        sensor.calculate(0.5, &state(1.25)).unwrap();
        assert_eq!(sensor.last_reading(), Some((0.5, 1.25, 2.0)));
        assert_eq!(sensor.readings(), 1);
    }

    #[test]
    fn test_dof_sensor_unknown_dof() {
        let mut sensor = DofSensor::new("knee_encoder", "knee", 100.0);
        let err = sensor.calculate(0.0, &state(0.0)).unwrap_err();
        assert_eq!(err.kind(), SimErrorKind::Graphics);
    }

    #[test]
    fn test_downcast() {
        let sensor: Box<dyn Sensor> = Box::new(DofSensor::new("s", "hip", 1.0));
        let concrete = sensor.as_any().downcast_ref::<DofSensor>().unwrap();
        assert_eq!(concrete.name(), "s");
    }
}
