//! Periodic recorders of the simulated state.
//!
//! A descriptor is a plain callback with a dump period counted in physics steps.
//! It is called after the integration of every step whose index is a multiple of
//! its period, so step 0 is always described.

use robosim_traits::{SimError, SimResult, StateSnapshot, WriteStream};
use std::fmt::{Debug, Formatter};

/// Handle returned by [`crate::driver::SimulationDriver::add_descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(u64);

/// `(step index, simulated time in seconds, state at the end of the step)`
pub type DescriptorFn = dyn FnMut(u64, f64, &StateSnapshot) -> SimResult<()> + Send;

pub(crate) struct Descriptor {
    id: DescriptorId,
    period: u64,
    describe: Box<DescriptorFn>,
}

impl Debug for Descriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("period", &self.period)
            .finish()
    }
}

impl Descriptor {
    fn is_due(&self, step: u64) -> bool {
        step % self.period == 0
    }
}

/// The descriptors of one driver, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Descriptors {
    next_id: u64,
    entries: Vec<Descriptor>,
}

impl Descriptors {
    pub(crate) fn add(
        &mut self,
        period: u64,
        describe: Box<DescriptorFn>,
    ) -> SimResult<DescriptorId> {
        if period == 0 {
            return Err(SimError::invalid_configuration(
                "a descriptor period is a number of steps >= 1",
            ));
        }
        let id = DescriptorId(self.next_id);
        self.next_id += 1;
        self.entries.push(Descriptor {
            id,
            period,
            describe,
        });
        Ok(id)
    }

    pub(crate) fn remove(&mut self, id: DescriptorId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|d| d.id != id);
        self.entries.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn describe(&mut self, step: u64, time: f64, state: &StateSnapshot) -> SimResult<()> {
        for descriptor in self.entries.iter_mut().filter(|d| d.is_due(step)) {
            (descriptor.describe)(step, time, state)?;
        }
        Ok(())
    }
}

/// Descriptor body logging every snapshot it sees into a stream.
///
/// ```ignore
/// let recorder = StateRecorder::new(stream);
/// driver.add_descriptor(10, recorder.into_descriptor())?;
/// ```
#[derive(Debug)]
pub struct StateRecorder<W: WriteStream<StateSnapshot>> {
    stream: W,
    recorded: u64,
}

impl<W: WriteStream<StateSnapshot>> StateRecorder<W> {
    pub fn new(stream: W) -> Self {
        StateRecorder {
            stream,
            recorded: 0,
        }
    }

    pub fn record(&mut self, state: &StateSnapshot) -> SimResult<()> {
        self.stream.log(state)?;
        self.recorded += 1;
        Ok(())
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Turns the recorder into a closure usable as a descriptor.
    pub fn into_descriptor(
        mut self,
    ) -> impl FnMut(u64, f64, &StateSnapshot) -> SimResult<()> + Send + 'static
    where
        W: 'static,
    {
        move |_step, _time, state| self.record(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    struct VecStream(Arc<Mutex<Vec<u64>>>);

    impl WriteStream<StateSnapshot> for VecStream {
        fn log(&mut self, obj: &StateSnapshot) -> SimResult<()> {
            self.0.lock().unwrap().push(obj.step);
            Ok(())
        }
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let mut descriptors = Descriptors::default();
        assert!(descriptors.add(0, Box::new(|_, _, _| Ok(()))).is_err());
        assert_eq!(descriptors.len(), 0);
    }

    #[test]
    fn test_period_and_removal() {
        let mut descriptors = Descriptors::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = descriptors
            .add(3, Box::new(move |step, _, _| {
                s.lock().unwrap().push(step);
                Ok(())
            }))
            .unwrap();
        let state = StateSnapshot::default();
        for step in 0..10 {
            descriptors.describe(step, 0.0, &state).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 3, 6, 9]);
        assert!(descriptors.remove(id));
        assert!(!descriptors.remove(id));
        assert_eq!(descriptors.len(), 0);
    }

    #[test]
    fn test_failure_stops_the_round() {
        let mut descriptors = Descriptors::default();
        descriptors
            .add(1, Box::new(|_, _, _| Err("disk full".into())))
            .unwrap();
        assert!(descriptors
            .describe(0, 0.0, &StateSnapshot::default())
            .is_err());
    }

    #[test]
    fn test_state_recorder() {
        let stream = VecStream::default();
        let mut recorder = StateRecorder::new(stream.clone());
        for step in [0, 5] {
            let state = StateSnapshot {
                step,
                ..Default::default()
            };
            recorder.record(&state).unwrap();
        }
        assert_eq!(recorder.recorded(), 2);
        assert_eq!(*stream.0.lock().unwrap(), vec![0, 5]);
    }
}
