#![doc = include_str!("../README.md")]

pub mod config;
pub mod context_pool;
pub mod descriptor;
pub mod driver;
pub mod graphics;
pub mod scheduler;
pub mod sensor;

mod log;

pub use config::{read_configuration, read_configuration_str, SimConfig};
pub use context_pool::{ContextFactory, ContextHandle, ContextPool, PoolMonitor, PoolStats};
pub use driver::{SimulationDriver, StopHandle};
pub use scheduler::{Scheduler, TickDecision};
