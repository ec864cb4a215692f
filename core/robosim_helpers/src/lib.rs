use robosim_clock::RobotClock;
use robosim_runtime::config::{read_configuration, SimConfig};
use robosim_traits::SimResult;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::path::Path;

mod stream;

pub use stream::{read_stream, stream_file_write, FileStream};

/// What an application needs to build its simulations.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub config: SimConfig,
    pub clock: RobotClock,
}

/// This is a basic setup for a robosim application to get you started.
/// Duplicate and customize as needed when your needs grow.
///
/// text_log: if Some, a terminal logger is installed at this level. Installing a logger
///           twice in the same process is not an error, the first one stays.
/// clock: if you let it to None it will create a default clock otherwise you can provide your own,
///        for example with let (clock, mock) = RobotClock::mock();
/// config_path: Optional path to a configuration file (.ron), the defaults are used otherwise.
pub fn basic_sim_setup(
    text_log: Option<LevelFilter>,
    clock: Option<RobotClock>,
    config_path: Option<&Path>,
) -> SimResult<SimContext> {
    if let Some(level) = text_log {
        if TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .is_err()
        {
            log::debug!("a logger is already installed, keeping it");
        }
    }

    let config = match config_path {
        Some(path) => {
            let config = read_configuration(path)?;
            log::info!("configuration loaded from {}", path.display());
            config
        }
        None => SimConfig::default(),
    };

    Ok(SimContext {
        config,
        clock: clock.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_setup_without_config() {
        let (clock, _mock) = RobotClock::mock();
        let ctx = basic_sim_setup(None, Some(clock), None).unwrap();
        assert_eq!(ctx.config, SimConfig::default());
        assert!(ctx.clock.is_mocked());
    }

    #[test]
    fn test_setup_with_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"(timestep: 0.002, graphics_frequency: 0.0)")
            .unwrap();
        let ctx = basic_sim_setup(Some(LevelFilter::Debug), None, Some(file.path())).unwrap();
        assert_eq!(ctx.config.timestep, 0.002);
        assert_eq!(ctx.config.graphics_frequency, 0.0);
        // twice is fine.
        basic_sim_setup(Some(LevelFilter::Info), None, None).unwrap();
    }

    #[test]
    fn test_setup_with_bad_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"(timestep: -1.0)").unwrap();
        assert!(basic_sim_setup(None, None, Some(file.path())).is_err());
    }
}
