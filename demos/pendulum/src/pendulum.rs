//! The simulated world: one damped pendulum and its actuator.

use robosim_clock::SimDuration;
use robosim_traits::{CommandMap, DofState, Physics, SimError, SimResult, StateSnapshot};
use std::f64::consts::PI;

pub const JOINT: &str = "pivot";

const GRAVITY: f64 = 9.81;

#[derive(Debug, Clone)]
pub struct Pendulum {
    length: f64,
    mass: f64,
    damping: f64,
    max_torque: f64,
    angle: f64,
    velocity: f64,
    torque: f64,
}

impl Pendulum {
    /// A 1m, 1kg pendulum starting at `angle` radians from the bottom.
    pub fn new(angle: f64) -> Self {
        Pendulum {
            length: 1.0,
            mass: 1.0,
            damping: 0.1,
            max_torque: 20.0,
            angle,
            velocity: 0.0,
            torque: 0.0,
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Potential plus kinetic energy, 0 at rest at the bottom.
    pub fn energy(&self) -> f64 {
        let inertia = self.mass * self.length * self.length;
        0.5 * inertia * self.velocity * self.velocity
            + self.mass * GRAVITY * self.length * (1.0 - self.angle.cos())
    }
}

impl Physics for Pendulum {
    fn integrate(&mut self, timestep: SimDuration) -> SimResult<()> {
        let dt = timestep.as_secs_f64();
        let inertia = self.mass * self.length * self.length;
        let acceleration = -GRAVITY / self.length * self.angle.sin() - self.damping * self.velocity
            + self.torque / inertia;
        // semi implicit Euler, stable enough for a toy.
        self.velocity += acceleration * dt;
        self.angle += self.velocity * dt;
        if !self.angle.is_finite() || !self.velocity.is_finite() {
            return Err(SimError::physics(format!(
                "pendulum diverged (angle {}, velocity {})",
                self.angle, self.velocity
            )));
        }
        Ok(())
    }

    fn apply_commands(&mut self, commands: &CommandMap) {
        if let Some(torque) = commands.get(JOINT) {
            self.torque = torque.clamp(-self.max_torque, self.max_torque);
        }
    }

    fn read_state(&self) -> StateSnapshot {
        StateSnapshot {
            dofs: vec![DofState {
                name: JOINT.to_string(),
                position: self.angle,
                velocity: self.velocity,
                command: self.torque,
            }],
            ..Default::default()
        }
    }
}

/// Proportional derivative controller bringing the joint to `target`.
#[derive(Debug, Clone, Copy)]
pub struct PdController {
    pub target: f64,
    pub kp: f64,
    pub kd: f64,
}

impl PdController {
    pub fn command(&self, state: &StateSnapshot) -> CommandMap {
        let mut commands = CommandMap::new();
        if let Some(dof) = state.dof(JOINT) {
            let error = wrap_angle(self.target - dof.position);
            commands.set(JOINT, self.kp * error - self.kd * dof.velocity);
        }
        commands
    }
}

/// Brings an angle back into `[-pi, pi)`.
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// Draws the pendulum angle as a one line gauge into `canvas`.
pub fn draw(canvas: &mut String, state: &StateSnapshot, width: usize) {
    canvas.clear();
    let angle = state.position(JOINT).map(wrap_angle).unwrap_or(0.0);
    let cursor = (((angle + PI) / (2.0 * PI)) * (width - 1) as f64).round() as usize;
    canvas.push_str(&format!("{:>9} [", state.time.to_string()));
    for column in 0..width {
        canvas.push(if column == cursor {
            'o'
        } else if column == width / 2 {
            '|'
        } else {
            ' '
        });
    }
    canvas.push_str(&format!("] {angle:+.3} rad"));
}
