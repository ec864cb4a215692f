mod pendulum;

use clap::Parser;
use log::info;
use pendulum::{draw, PdController, Pendulum};
use robosim_helpers::{basic_sim_setup, FileStream};
use robosim_runtime::descriptor::StateRecorder;
use robosim_runtime::graphics::OffscreenGraphics;
use robosim_runtime::{ContextPool, SimulationDriver, StopHandle};
use robosim_traits::{SimError, SimResult};
use simplelog::LevelFilter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

const GAUGE_WIDTH: usize = 41;

/// Swings a damped pendulum back to the bottom with a PD controller.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// RON configuration file, command line options override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated seconds to run.
    #[arg(short, long)]
    duration: Option<f64>,

    /// Physics timestep in seconds.
    #[arg(short, long)]
    timestep: Option<f64>,

    /// Control updates per simulated second.
    #[arg(long)]
    control_hz: Option<f64>,

    /// Frames per simulated second, 0 disables rendering.
    #[arg(long)]
    graphics_hz: Option<f64>,

    /// Records the state of every 10th step into this file.
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Slows the simulation down to real time.
    #[arg(long)]
    sync: bool,

    /// Runs this many pendulums in parallel, sharing the rendering contexts.
    #[arg(long, default_value_t = 1)]
    rollouts: usize,

    /// Initial angle in radians.
    #[arg(long, default_value_t = 2.5)]
    angle: f64,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug)]
struct Summary {
    rollout: usize,
    steps: u64,
    control_ticks: u64,
    frames: u64,
    real_time_factor: f64,
    final_angle: f64,
    final_energy: f64,
}

fn main() -> SimResult<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let ctx = basic_sim_setup(Some(level), None, cli.config.as_deref())?;
    let mut config = ctx.config;
    if let Some(timestep) = cli.timestep {
        config.timestep = timestep;
    }
    if let Some(hz) = cli.control_hz {
        config.control_frequency = Some(hz);
    }
    if let Some(hz) = cli.graphics_hz {
        config.graphics_frequency = hz;
    }
    if let Some(duration) = cli.duration {
        config.max_duration = duration;
    }
    config.sync_to_real_time |= cli.sync;
    config.validate()?;

    let pool = ContextPool::with_capacity(
        "ascii",
        config.context_capacity,
        |_slot: usize| -> SimResult<String> { Ok(String::with_capacity(128)) },
    )?;

    let stop_handles: Arc<Mutex<Vec<StopHandle>>> = Arc::default();
    let handles = stop_handles.clone();
    ctrlc::set_handler(move || {
        println!("Ctrl-C pressed. Stopping all simulations...");
        if let Ok(handles) = handles.lock() {
            handles.iter().for_each(|h| h.stop(true));
        }
    })
    .map_err(|e| SimError::from("cannot install the Ctrl-C handler").with_cause(e))?;

    let print_frames = cli.rollouts == 1;
    info!(
        "simulating {} pendulum(s) for {} s, timestep {} s",
        cli.rollouts, config.max_duration, config.timestep
    );
    let summaries = thread::scope(|scope| {
        let workers: Vec<_> = (0..cli.rollouts.max(1))
            .map(|rollout| {
                let pool = pool.clone();
                let config = config.clone();
                let stop_handles = stop_handles.clone();
                let record = cli.record.as_ref().map(|path| {
                    if cli.rollouts > 1 {
                        path.with_extension(format!("{rollout}.bin"))
                    } else {
                        path.clone()
                    }
                });
                // each rollout starts a bit further from the bottom.
                let angle = cli.angle + 0.1 * rollout as f64;
                scope.spawn(move || -> SimResult<Summary> {
                    let mut driver = SimulationDriver::from_config(Pendulum::new(angle), &config)?;
                    if let Ok(mut handles) = stop_handles.lock() {
                        handles.push(driver.stop_handle());
                    }
                    let controller = PdController {
                        target: 0.0,
                        kp: 25.0,
                        kd: 6.0,
                    };
                    driver.add_controller(move |_, state| controller.command(state));
                    if let Some(path) = record {
                        let recorder = StateRecorder::new(FileStream::create(&path)?);
                        driver.add_descriptor(10, recorder.into_descriptor())?;
                    }
                    driver.set_graphics(OffscreenGraphics::new(
                        pool,
                        move |canvas: &mut String, state| {
                            draw(canvas, state, GAUGE_WIDTH);
                            if print_frames {
                                println!("{canvas}");
                            }
                            Ok(())
                        },
                    ));

                    driver.run(config.max_duration, false)?;
                    let summary = Summary {
                        rollout,
                        steps: driver.scheduler().step_count(),
                        control_ticks: driver.control_ticks(),
                        frames: driver.graphics_ticks(),
                        real_time_factor: driver.scheduler().real_time_factor(),
                        final_angle: driver.physics().angle(),
                        final_energy: driver.physics().energy(),
                    };
                    // flushes the record file.
                    driver.clear_descriptors();
                    Ok(summary)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| {
                w.join()
                    .unwrap_or_else(|_| Err("a simulation thread panicked".into()))
            })
            .collect::<Vec<_>>()
    });

    for summary in summaries {
        let summary = summary?;
        println!(
            "rollout {}: {} steps, {} control ticks, {} frames, final angle {:+.4} rad, energy {:.4} J, real time factor {:.1}",
            summary.rollout,
            summary.steps,
            summary.control_ticks,
            summary.frames,
            summary.final_angle,
            summary.final_energy,
            summary.real_time_factor
        );
    }
    let stats = pool.stats();
    println!(
        "rendering contexts: {} created for a capacity of {}",
        stats.created, stats.capacity
    );
    Ok(())
}
