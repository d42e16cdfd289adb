//! Error types for the sf-app runtime layer.

use std::fmt;
use std::path::PathBuf;

use sf_config::ConfigError;
use sf_controls::ControlError;
use sf_core::SfError;

/// Failure reported by a driver: an interface, temperature source or actuator.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Missing option '{0}'")]
    MissingOption(&'static str),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unexpected content '{content}' in {path}")]
    Parse { path: PathBuf, content: String },

    #[error("No temperature for channel '{0}'")]
    NoReading(String),

    #[error("Channel '{0}' cannot be added after setup")]
    Sealed(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error(transparent)]
    Value(#[from] SfError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Application error type for building and running a controller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration ({context}): {source}")]
    Configuration {
        context: String,
        source: ControlError,
    },

    #[error("Interface '{interface}' failed during {stage}: {source}")]
    Interface {
        interface: String,
        stage: &'static str,
        source: DriverError,
    },

    #[error("Failed to read sensor '{sensor}': {source}")]
    SourceRead { sensor: String, source: DriverError },

    #[error("Failed to drive fan '{fan}': {source}")]
    Actuation { fan: String, source: DriverError },

    #[error("Failed to evaluate fan '{fan}': {source}")]
    Evaluation { fan: String, source: ControlError },

    #[error("{}", Failures(.0))]
    Aggregate(Vec<AppError>),

    #[error("Controller is {state}, cannot {action}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sf-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<ControlError> for AppError {
    fn from(source: ControlError) -> Self {
        AppError::Configuration {
            context: "controller".to_string(),
            source,
        }
    }
}

impl AppError {
    /// Collapse a list of failures: none is success, one is itself.
    pub fn from_failures(mut errors: Vec<AppError>) -> AppResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(AppError::Aggregate(errors)),
        }
    }
}

struct Failures<'a>(&'a [AppError]);

impl fmt::Display for Failures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failures", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}
