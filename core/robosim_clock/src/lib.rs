//! Time primitives for the simulation driver.
//!
//! Simulated time is kept as an integer number of nanoseconds so that
//! `step_count * timestep` is exact, whatever the number of steps. Floating
//! seconds only appear at the edges of the API (user facing setters and
//! accessors).
//!
//! [`RobotClock`] measures wall time and is only used to report the real-time
//! factor and to optionally slow the simulation down to real time.
#[cfg(test)]
#[macro_use]
extern crate approx;

use bincode::{Decode, Encode};
use core::ops::{Add, Sub};
pub use quanta::Instant;
use quanta::{Clock, Mock};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{AddAssign, Div, Mul, SubAssign};
use std::sync::Arc;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A span of simulated (or wall) time, in nanoseconds.
/// It is always positive to simplify the reasoning on the user side.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Encode,
    Decode,
    Default,
)]
pub struct SimDuration(pub u64);

/// A point on the simulated timeline, measured from the start of the run.
pub type SimTime = SimDuration;

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);
    pub const MAX: SimDuration = SimDuration(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimDuration(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimDuration(millis * 1_000_000)
    }

    /// Converts floating seconds to the closest nanosecond count.
    /// Returns `None` for negative, NaN, infinite or out of range values.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let nanos = (secs * NANOS_PER_SEC as f64).round();
        if nanos >= u64::MAX as f64 {
            return None;
        }
        Some(SimDuration(nanos as u64))
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        let Self(nanos) = self;
        *nanos
    }

    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        let Self(nanos) = *self;
        nanos as f64 / NANOS_PER_SEC as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_mul(self, rhs: u64) -> Option<Self> {
        self.0.checked_mul(rhs).map(SimDuration)
    }

    pub fn saturating_sub(self, rhs: SimDuration) -> Self {
        SimDuration(self.0.saturating_sub(rhs.0))
    }

    pub fn max(self, other: SimDuration) -> SimDuration {
        SimDuration(self.0.max(other.0))
    }

    pub fn min(self, other: SimDuration) -> SimDuration {
        SimDuration(self.0.min(other.0))
    }
}

impl From<Duration> for SimDuration {
    fn from(duration: Duration) -> Self {
        SimDuration(duration.as_nanos() as u64)
    }
}

impl From<SimDuration> for Duration {
    fn from(val: SimDuration) -> Self {
        let SimDuration(nanos) = val;
        Duration::from_nanos(nanos)
    }
}

impl From<u64> for SimDuration {
    fn from(nanos: u64) -> Self {
        SimDuration(nanos)
    }
}

impl From<SimDuration> for u64 {
    fn from(val: SimDuration) -> Self {
        val.0
    }
}

impl Sub for SimDuration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        SimDuration(self.0 - rhs.0)
    }
}

impl Add for SimDuration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        SimDuration(self.0 + rhs.0)
    }
}

impl AddAssign for SimDuration {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for SimDuration {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

// duration / scalar, mostly for averages.
impl<T> Div<T> for SimDuration
where
    T: Into<u64>,
{
    type Output = Self;

    fn div(self, rhs: T) -> Self {
        SimDuration(self.0 / rhs.into())
    }
}

// duration * scalar, mostly for step_count * timestep.
impl<T> Mul<T> for SimDuration
where
    T: Into<u64>,
{
    type Output = SimDuration;

    fn mul(self, rhs: T) -> SimDuration {
        SimDuration(self.0 * rhs.into())
    }
}

impl Mul<SimDuration> for u64 {
    type Output = SimDuration;

    fn mul(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self * rhs.0)
    }
}

impl Display for SimDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Self(nanos) = *self;
        if nanos >= 3_600_000_000_000 {
            write!(f, "{:.3} h", nanos as f64 / 3_600_000_000_000.0)
        } else if nanos >= 60_000_000_000 {
            write!(f, "{:.3} m", nanos as f64 / 60_000_000_000.0)
        } else if nanos >= NANOS_PER_SEC {
            write!(f, "{:.3} s", nanos as f64 / NANOS_PER_SEC as f64)
        } else if nanos >= 1_000_000 {
            write!(f, "{:.3} ms", nanos as f64 / 1_000_000.0)
        } else if nanos >= 1_000 {
            write!(f, "{:.3} µs", nanos as f64 / 1_000.0)
        } else {
            write!(f, "{nanos} ns")
        }
    }
}

/// A monotonic wall clock starting at an arbitrary reference time.
/// Clones share the same time source, even when mocked.
#[derive(Clone, Debug)]
pub struct RobotClock {
    inner: Clock,
    ref_time: Instant,
    mock: Option<Arc<Mock>>,
}

/// Handle controlling every clone of a mocked [`RobotClock`].
#[derive(Debug, Clone)]
pub struct RobotClockMock(Arc<Mock>);

impl RobotClockMock {
    pub fn increment(&self, amount: Duration) {
        self.0.increment(amount);
    }

    /// Current value of the mocked time since its creation.
    pub fn now(&self) -> SimDuration {
        self.0.value().into()
    }

    /// Sets the absolute value of the time. Moving backwards breaks monotonicity.
    pub fn set_value(&self, value: u64) {
        let v = self.0.value();
        if v < value {
            self.0.increment(Duration::from_nanos(value - v));
        } else {
            self.0.decrement(Duration::from_nanos(v - value));
        }
    }
}

impl RobotClock {
    /// Creates a clock reading 0ns now and incrementing monotonically.
    pub fn new() -> Self {
        let clock = Clock::new();
        let ref_time = clock.now();
        RobotClock {
            inner: clock,
            ref_time,
            mock: None,
        }
    }

    /// Builds a fake clock with a reference time of 0.
    /// Sleeping on a mocked clock advances the mock instead of blocking the thread.
    pub fn mock() -> (Self, RobotClockMock) {
        let (clock, mock) = Clock::mock();
        let ref_time = clock.now();
        (
            RobotClock {
                inner: clock,
                ref_time,
                mock: Some(mock.clone()),
            },
            RobotClockMock(mock),
        )
    }

    /// Time elapsed since the reference time.
    #[inline]
    pub fn now(&self) -> SimDuration {
        (self.inner.now() - self.ref_time).into()
    }

    pub fn is_mocked(&self) -> bool {
        self.mock.is_some()
    }

    /// Waits for `amount` of wall time.
    pub fn sleep(&self, amount: Duration) {
        match &self.mock {
            Some(mock) => mock.increment(amount),
            None => std::thread::sleep(amount),
        }
    }
}

impl Default for RobotClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simduration_arithmetic_operations() {
        let a = SimDuration(100);
        let b = SimDuration(50);

        assert_eq!(a + b, SimDuration(150));
        assert_eq!(a - b, SimDuration(50));
        assert_eq!(a * 2u32, SimDuration(200));
        assert_eq!(3u64 * a, SimDuration(300));
        assert_eq!(a / 2u32, SimDuration(50));
        assert_eq!(b.saturating_sub(a), SimDuration::ZERO);
    }

    #[test]
    fn test_from_secs_f64() {
        assert_eq!(
            SimDuration::from_secs_f64(0.01),
            Some(SimDuration(10_000_000))
        );
        assert_eq!(
            SimDuration::from_secs_f64(0.015),
            Some(SimDuration(15_000_000))
        );
        assert_eq!(SimDuration::from_secs_f64(0.0), Some(SimDuration::ZERO));
        assert_eq!(SimDuration::from_secs_f64(-1.0), None);
        assert_eq!(SimDuration::from_secs_f64(f64::NAN), None);
        assert_eq!(SimDuration::from_secs_f64(f64::INFINITY), None);
        assert_eq!(SimDuration::from_secs_f64(1e30), None);
    }

    #[test]
    fn test_step_multiples_are_exact() {
        // 0.1 is not representable in binary, the nanosecond count is.
        let dt = SimDuration::from_secs_f64(0.1).unwrap();
        let t = dt * 1_000_000u64;
        assert_eq!(t, SimDuration(100_000 * NANOS_PER_SEC));
        assert_relative_eq!(t.as_secs_f64(), 100_000.0);
    }

    #[test]
    fn test_checked_mul_overflow() {
        assert_eq!(SimDuration(2).checked_mul(3), Some(SimDuration(6)));
        assert_eq!(SimDuration::MAX.checked_mul(2), None);
    }

    #[test]
    fn test_simduration_display() {
        assert_eq!(SimDuration(42).to_string(), "42 ns");
        assert_eq!(SimDuration(42_000).to_string(), "42.000 µs");
        assert_eq!(SimDuration(15_000_000).to_string(), "15.000 ms");
        assert_eq!(SimDuration(1_500_000_000).to_string(), "1.500 s");
        assert_eq!(SimDuration(90_000_000_000).to_string(), "1.500 m");
        assert_eq!(SimDuration(3_600_000_000_000).to_string(), "1.000 h");
    }

    #[test]
    fn test_mock_clone() {
        let (clock, mock) = RobotClock::mock();
        assert_eq!(clock.now(), SimDuration::ZERO);
        let clock_clone = clock.clone();
        mock.increment(Duration::from_secs(1));
        assert_eq!(clock_clone.now(), Duration::from_secs(1).into());
        assert_eq!(mock.now(), Duration::from_secs(1).into());
    }

    #[test]
    fn test_mock_set_value() {
        let (clock, mock) = RobotClock::mock();
        mock.set_value(30_000_000_000);
        assert_eq!(clock.now(), Duration::from_secs(30).into());
        mock.set_value(10_000_000_000);
        assert_eq!(clock.now(), Duration::from_secs(10).into());
    }

    #[test]
    fn test_sleep_on_mock_advances_time() {
        let (clock, mock) = RobotClock::mock();
        assert!(clock.is_mocked());
        clock.sleep(Duration::from_millis(250));
        assert_eq!(mock.now(), SimDuration::from_millis(250));
        assert_eq!(clock.now(), SimDuration::from_millis(250));
    }

    #[test]
    fn test_real_clock_is_monotonic() {
        let clock = RobotClock::new();
        assert!(!clock.is_mocked());
        let a = clock.now();
        let b = clock.now();
        assert!(a <= b);
    }

    #[test]
    fn test_duration_bridge() {
        let d: Duration = SimDuration(1_500).into();
        assert_eq!(d, Duration::from_nanos(1_500));
        let back: SimDuration = d.into();
        assert_eq!(back, SimDuration(1_500));
    }
}
