use approx::assert_relative_eq;
use robosim_clock::{RobotClock, SimDuration};
use robosim_runtime::graphics::OffscreenGraphics;
use robosim_runtime::{ContextPool, SimulationDriver};
use robosim_traits::{
    CommandMap, DofState, Graphics, Physics, SimError, SimErrorKind, SimResult, StateSnapshot,
};
use std::sync::{Arc, Mutex};

/// Logs every call in order, so the step ordering can be checked.
#[derive(Debug, Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct JournaledPhysics {
    journal: Journal,
    command: f64,
    position: f64,
    fail_after: Option<u64>,
    integrations: u64,
}

impl JournaledPhysics {
    fn new(journal: Journal) -> Self {
        JournaledPhysics {
            journal,
            command: 0.0,
            position: 0.0,
            fail_after: None,
            integrations: 0,
        }
    }
}

impl Physics for JournaledPhysics {
    fn integrate(&mut self, timestep: SimDuration) -> SimResult<()> {
        if self.fail_after.is_some_and(|n| self.integrations >= n) {
            return Err(SimError::physics("numerical divergence"));
        }
        self.position += self.command * timestep.as_secs_f64();
        self.integrations += 1;
        self.journal.push(format!("integrate {}", self.integrations));
        Ok(())
    }

    fn apply_commands(&mut self, commands: &CommandMap) {
        if let Some(u) = commands.get("wheel") {
            self.command = u;
        }
        self.journal.push(format!("apply {}", self.command));
    }

    fn read_state(&self) -> StateSnapshot {
        StateSnapshot {
            dofs: vec![DofState {
                name: "wheel".into(),
                position: self.position,
                velocity: self.command,
                command: self.command,
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct JournaledGraphics {
    journal: Journal,
    close_after: Option<u64>,
    refreshes: u64,
}

impl Graphics for JournaledGraphics {
    fn refresh(&mut self, state: &StateSnapshot) -> SimResult<()> {
        self.refreshes += 1;
        self.journal.push(format!("refresh {}", state.step));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_after.is_some_and(|n| self.refreshes >= n)
    }

    fn record_frame(&mut self, state: &StateSnapshot) -> SimResult<()> {
        self.journal.push(format!("frame {}", state.step));
        Ok(())
    }
}

fn driver(timestep: f64) -> (SimulationDriver<JournaledPhysics>, Journal) {
    let journal = Journal::default();
    let driver = SimulationDriver::new(JournaledPhysics::new(journal.clone()), timestep).unwrap();
    (driver, journal)
}

#[test]
fn run_stops_at_max_duration() {
    let (mut driver, _) = driver(0.01);
    driver.run(5.0, false).unwrap();
    assert_eq!(driver.scheduler().step_count(), 500);
    assert_eq!(driver.physics().integrations, 500);
    assert_relative_eq!(driver.scheduler().current_time(), 5.0, epsilon = 1e-12);
}

#[test]
fn control_at_10hz_over_2000_steps() {
    let (mut driver, _) = driver(0.01);
    driver.set_control_frequency(10.0).unwrap();
    driver.set_graphics_frequency(0.0).unwrap();
    let ticks_at = Arc::new(Mutex::new(Vec::new()));
    let t = ticks_at.clone();
    driver.add_controller(move |_, state| {
        t.lock().unwrap().push(state.step);
        CommandMap::new()
    });
    for _ in 0..2000 {
        driver.step(false).unwrap();
    }
    let ticks_at = ticks_at.lock().unwrap();
    assert_eq!(ticks_at.len(), 200);
    assert_eq!(driver.control_ticks(), 200);
    assert!(ticks_at.iter().all(|step| step % 10 == 0));
    assert_eq!(ticks_at.last(), Some(&1990));
}

#[test]
fn control_at_physics_frequency_over_2000_steps() {
    let (mut driver, _) = driver(0.01);
    assert_relative_eq!(driver.set_control_frequency(100.0).unwrap(), 100.0);
    for _ in 0..2000 {
        driver.step_world(false).unwrap();
    }
    assert_eq!(driver.control_ticks(), 2000);
}

#[test]
fn step_ordering() {
    let (mut driver, journal) = driver(0.01);
    driver.set_graphics_frequency(100.0).unwrap();
    driver.set_graphics(JournaledGraphics {
        journal: journal.clone(),
        close_after: None,
        refreshes: 0,
    });
    let j = journal.clone();
    driver.add_controller(move |_, state| {
        j.push(format!("control {}", state.step));
        [("wheel", 1.0)].into_iter().collect()
    });
    driver.step(false).unwrap();
    driver.step(true).unwrap();
    assert_eq!(
        journal.entries(),
        vec![
            "control 0",
            "apply 1",
            "integrate 1",
            "refresh 1",
            "frame 1",
            "control 1",
            "apply 1",
            "integrate 2",
            "apply 0",
            "refresh 2",
            "frame 2",
        ]
    );
    // the graphics saw the end of step state, before the reset.
    assert_relative_eq!(driver.physics().position, 0.02, epsilon = 1e-12);
}

#[test]
fn graphics_closing_ends_the_run() {
    let (mut driver, journal) = driver(0.01);
    driver.set_graphics_frequency(10.0).unwrap();
    driver.set_graphics(JournaledGraphics {
        journal,
        close_after: Some(3),
        refreshes: 0,
    });
    driver.run(5.0, false).unwrap();
    // refreshes on steps 0, 10 and 20.
    assert_eq!(driver.scheduler().step_count(), 21);
    assert_eq!(driver.graphics_ticks(), 3);
    assert!(driver.graphics().unwrap().is_closed());
}

#[test]
fn unbounded_run_ends_when_graphics_close() {
    let (mut driver, journal) = driver(0.01);
    driver.set_graphics_frequency(10.0).unwrap();
    driver.set_graphics(JournaledGraphics {
        journal,
        close_after: Some(3),
        refreshes: 0,
    });
    driver.run(f64::INFINITY, false).unwrap();
    assert_eq!(driver.scheduler().step_count(), 21);

    // durations past the representable range are unbounded too.
    let journal = Journal::default();
    let mut halted = SimulationDriver::new(JournaledPhysics::new(journal), 0.01).unwrap();
    halted.stop(true);
    halted.run(1e300, false).unwrap();
    assert_eq!(halted.scheduler().step_count(), 0);
    assert_eq!(
        halted.run(f64::NAN, false).unwrap_err().kind(),
        SimErrorKind::InvalidConfiguration
    );
}

#[test]
fn closed_graphics_are_no_longer_refreshed() {
    let (mut driver, journal) = driver(0.01);
    driver.set_graphics_frequency(10.0).unwrap();
    driver.set_graphics(JournaledGraphics {
        journal: journal.clone(),
        close_after: Some(2),
        refreshes: 0,
    });
    for _ in 0..50 {
        driver.step(false).unwrap();
    }
    assert_eq!(driver.graphics_ticks(), 2);
    let refreshes = journal
        .entries()
        .iter()
        .filter(|e| e.starts_with("refresh"))
        .count();
    assert_eq!(refreshes, 2);
}

#[test]
fn step_world_never_renders() {
    let (mut driver, journal) = driver(0.01);
    driver.set_graphics(JournaledGraphics {
        journal: journal.clone(),
        close_after: None,
        refreshes: 0,
    });
    for _ in 0..10 {
        driver.step_world(false).unwrap();
    }
    assert_eq!(driver.graphics_ticks(), 0);
    assert!(journal.entries().iter().all(|e| !e.starts_with("refresh")));
}

#[test]
fn physics_failure_ends_the_run_and_poisons_the_driver() {
    let journal = Journal::default();
    let mut physics = JournaledPhysics::new(journal);
    physics.fail_after = Some(42);
    let mut driver = SimulationDriver::new(physics, 0.01).unwrap();
    let err = driver.run(5.0, false).unwrap_err();
    assert_eq!(err.kind(), SimErrorKind::Physics);
    assert_eq!(driver.physics().integrations, 42);
    assert_eq!(
        driver.run(5.0, false).unwrap_err().kind(),
        SimErrorKind::Unusable
    );
}

#[test]
fn stop_through_the_handle() {
    let (mut driver, _) = driver(0.001);
    let handle = driver.stop_handle();
    driver.add_controller(move |time, _| {
        if time >= 0.5 {
            handle.stop(true);
        }
        CommandMap::new()
    });
    driver.run(100.0, false).unwrap();
    assert!(driver.halted());
    // the step in progress completed.
    assert_eq!(driver.scheduler().step_count(), 501);
}

#[test]
fn sync_follows_the_wall_clock() {
    let (clock, mock) = RobotClock::mock();
    let journal = Journal::default();
    let mut driver =
        SimulationDriver::with_clock(JournaledPhysics::new(journal), 0.01, clock).unwrap();
    driver.set_sync(true);
    driver.run(1.0, false).unwrap();
    // the mocked sleeps moved the wall clock along with simulated time.
    assert_eq!(mock.now(), SimDuration::from_millis(990));
    assert_relative_eq!(driver.scheduler().real_time(), 0.99, epsilon = 1e-9);
}

#[test]
fn offscreen_rendering_through_a_pool() {
    let pool = ContextPool::with_capacity("e2e", 1, |slot: usize| -> SimResult<String> {
        Ok(format!("context-{slot}"))
    })
    .unwrap();
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let r = rendered.clone();
    let graphics = OffscreenGraphics::new(pool.clone(), move |ctx: &mut String, state| {
        r.lock().unwrap().push((ctx.clone(), state.step));
        Ok(())
    })
    .with_max_frames(4);

    let (mut driver, _) = driver(0.01);
    driver.set_graphics_frequency(20.0).unwrap();
    driver.set_graphics(graphics);
    driver.run(5.0, false).unwrap();
    // closed after its fourth frame.
    assert_eq!(driver.scheduler().step_count(), 16);

    let rendered = rendered.lock().unwrap();
    assert_eq!(rendered.len(), 4);
    assert!(rendered.iter().all(|(ctx, _)| ctx == "context-0"));
    assert_eq!(
        rendered.iter().map(|(_, step)| *step).collect::<Vec<_>>(),
        vec![1, 6, 11, 16]
    );
    assert_eq!(pool.stats().created, 1);
    assert_eq!(pool.stats().in_use, 0);
}
