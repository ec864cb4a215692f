use anyhow::Error as AnyhowError;
use bincode::Encode;
use core::error::Error;
use core::fmt::{Debug, Display};
use std::fmt::Formatter;

mod state;

pub use state::{CommandMap, DofState, StateSnapshot};

/// Broad family of a [`SimError`], callers match on it to decide whether the
/// simulation instance has to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimErrorKind {
    /// Bad timestep, frequency or capacity, detected at the setter call.
    InvalidConfiguration,
    /// The lazy creation of a rendering context failed.
    ContextCreationFailed,
    /// A context slot was released while not being held.
    DoubleRelease,
    /// Opaque failure of the physics collaborator.
    Physics,
    /// Failure of the graphics collaborator or of a sensor/descriptor hook.
    Graphics,
    /// Configuration files or record streams.
    Io,
    /// The driver already failed once and must be reconstructed.
    Unusable,
    Other,
}

impl Display for SimErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SimErrorKind::InvalidConfiguration => "invalid configuration",
            SimErrorKind::ContextCreationFailed => "context creation failed",
            SimErrorKind::DoubleRelease => "double release",
            SimErrorKind::Physics => "physics error",
            SimErrorKind::Graphics => "graphics error",
            SimErrorKind::Io => "io error",
            SimErrorKind::Unusable => "simulation unusable",
            SimErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct SimError {
    kind: SimErrorKind,
    message: String,
    cause: Option<AnyhowError>,
}

impl Display for SimError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {} (cause: {})", self.kind, self.message, cause),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl Error for SimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| &**c as &(dyn Error + 'static))
    }
}

impl From<&str> for SimError {
    fn from(s: &str) -> SimError {
        SimError::new(SimErrorKind::Other, s)
    }
}

impl From<String> for SimError {
    fn from(s: String) -> SimError {
        SimError::new(SimErrorKind::Other, s)
    }
}

impl SimError {
    pub fn new(kind: SimErrorKind, message: impl Into<String>) -> SimError {
        SimError {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::InvalidConfiguration, message)
    }

    pub fn context_creation_failed(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::ContextCreationFailed, message)
    }

    pub fn double_release(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::DoubleRelease, message)
    }

    pub fn physics(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::Physics, message)
    }

    pub fn graphics(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::Graphics, message)
    }

    pub fn io(message: impl Into<String>) -> SimError {
        SimError::new(SimErrorKind::Io, message)
    }

    pub fn with_cause(mut self, cause: impl Into<AnyhowError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> SimErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Same kind and message, without the cause, so an error can be both
    /// returned and remembered.
    pub fn shallow_clone(&self) -> SimError {
        SimError::new(self.kind, self.message.clone())
    }
}

// Generic Result type for robosim.
pub type SimResult<T> = Result<T, SimError>;

/// Defines a basic write, append only stream trait to be able to log or send serializable objects.
pub trait WriteStream<E: Encode>: Send + Debug {
    fn log(&mut self, obj: &E) -> SimResult<()>;
    fn flush(&mut self) -> SimResult<()> {
        Ok(())
    }
}

/// The external physics engine advancing the world by one timestep.
pub trait Physics {
    /// Integrates the world over `timestep` with the commands applied so far.
    fn integrate(&mut self, timestep: robosim_clock::SimDuration) -> SimResult<()>;

    /// Sets the actuation commands used by the next integrations.
    /// Dofs absent from the map keep their current command.
    fn apply_commands(&mut self, commands: &CommandMap);

    /// Reads the current state of the world. Time and step are stamped by the driver.
    fn read_state(&self) -> StateSnapshot;
}

/// The external renderer or recorder of the simulated state.
pub trait Graphics {
    /// Renders the state as of the end of the current physics step.
    fn refresh(&mut self, state: &StateSnapshot) -> SimResult<()>;

    /// True once the renderer is done (e.g. its window was closed); ends `run`.
    fn is_closed(&self) -> bool {
        false
    }

    /// Video capture hook, called right after each refresh.
    fn record_frame(&mut self, _state: &StateSnapshot) -> SimResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_kind() {
        let err = SimError::invalid_configuration("timestep must be > 0");
        assert_eq!(err.kind(), SimErrorKind::InvalidConfiguration);
        assert_eq!(
            err.to_string(),
            "invalid configuration: timestep must be > 0"
        );
    }

    #[test]
    fn test_error_with_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err = SimError::io("cannot open sim.ron").with_cause(io);
        assert_eq!(err.kind(), SimErrorKind::Io);
        assert!(err.to_string().contains("nope"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_strings() {
        let err: SimError = "plain".into();
        assert_eq!(err.kind(), SimErrorKind::Other);
        let err: SimError = format!("step {}", 3).into();
        assert_eq!(err.message(), "step 3");
    }

    #[test]
    fn test_shallow_clone_drops_cause() {
        let err = SimError::physics("diverged").with_cause(anyhow::anyhow!("nan"));
        let copy = err.shallow_clone();
        assert_eq!(copy.kind(), SimErrorKind::Physics);
        assert_eq!(copy.message(), "diverged");
        assert!(copy.source().is_none());
    }
}
