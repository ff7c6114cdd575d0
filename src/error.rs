//! Error types for the SESAM controller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::REMEDIATION;

/// Reasons a command frame or benchmark tag is refused before anything is written.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A command needs at least its name.
    #[error("a command needs at least one parameter")]
    NoParameters,
    /// More parameters than the device can buffer.
    #[error("{0} parameters given, the device accepts at most 10")]
    TooManyParameters(usize),
    /// A parameter does not fit in the device's fixed field.
    #[error("parameter {index} is {len} bytes long, the limit is 29")]
    ParameterTooLong { index: usize, len: usize },
    /// The benchmark name does not fit in the device's fixed field.
    #[error("benchmark name is {0} bytes long, the limit is 29")]
    TagTooLong(usize),
    /// Fields are C strings on the device side and cannot carry NUL.
    #[error("parameter {0} contains a NUL byte")]
    EmbeddedNul(usize),
}

/// Which handshake loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the list ready flag.
    ListReady,
    /// Draining one line of list output.
    ListLine,
    /// Draining the benchmark statistics.
    BenchmarkResult,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::ListReady => "list ready flag",
            Stage::ListLine => "list line terminator",
            Stage::BenchmarkResult => "benchmark result terminator",
        };
        f.write_str(name)
    }
}

/// Main error type for all controller operations.
#[derive(Debug, Error)]
pub enum SesamError {
    /// The base address record is missing, unreadable or zero.
    #[error("configuration error in {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    /// A mapping was requested at physical address zero.
    #[error("the monitor base address is zero")]
    ZeroAddress,

    /// The physical window could not be mapped or unmapped.
    #[error("cannot map SESAM monitor at {address:#x}: {source}")]
    Map {
        address: u64,
        #[source]
        source: std::io::Error,
    },

    /// The command was refused before touching the device.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device did not answer within the polling budget.
    #[error("device did not respond: gave up waiting for {stage} after {waited:?}")]
    HandshakeTimeout { stage: Stage, waited: Duration },

    /// Writing device output or running the benchmark failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The command line is missing something the command needs.
    #[error("{0}")]
    Usage(String),
}

impl SesamError {
    /// Operator hint printed after fatal setup errors.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SesamError::Config { .. } | SesamError::ZeroAddress => Some(REMEDIATION),
            SesamError::Map { .. } => {
                Some("Please check the monitor address in the configuration file and run as root")
            }
            _ => None,
        }
    }
}

/// Result type alias using SesamError.
pub type Result<T> = std::result::Result<T, SesamError>;
