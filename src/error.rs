//! Errors raised while turning configuration into scan settings.
//!
//! These are precondition violations: they are reported before any probe is
//! sent. A probe that fails at runtime is not an error, see
//! [`FailureReason`](crate::scanner::FailureReason).
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid address range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },
    #[error("Invalid seed address '{0}'")]
    InvalidSeed(String),
    #[error("No ports to probe: both the TCP and the UDP port lists are empty")]
    NoPorts,
    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("The {0} timeout must be greater than zero")]
    ZeroTimeout(crate::candidate::Protocol),
    #[error("Nothing to probe: no address ranges and no seed addresses")]
    NoAddresses,
    #[error("Address range '{0}' samples zero hosts")]
    ZeroSamples(String),
    #[error("Port 0 is not a valid {0} port")]
    ZeroPort(crate::candidate::Protocol),
    #[error("Address range '{range}' asks for {samples} hosts, at most {max} are allowed")]
    TooManySamples {
        range: String,
        samples: usize,
        max: usize,
    },
}

/// Errors raised while loading the TOML configuration file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("Could not read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}
