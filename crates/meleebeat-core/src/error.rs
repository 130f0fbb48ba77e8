//! Error types for the meleebeat engine.

use crate::music::TimbreClass;
use crate::voice_pool::NodeKind;
use thiserror::Error;

/// Errors raised at component boundaries.
///
/// The engine recovers all runtime categories locally (counting and
/// logging them); these variants exist so each component can be tested
/// on its own.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A non-positive or non-finite tempo was requested.
    #[error("Invalid tempo: {0} BPM (must be > 0)")]
    InvalidTempo(f64),

    /// A repeating event was registered with a non-positive period.
    #[error("Invalid period: {0} beats (must be > 0)")]
    InvalidPeriod(f64),

    /// The timing judge was configured with a zero subdivision.
    #[error("Invalid subdivision: {0}")]
    InvalidSubdivision(u32),

    /// Every voice of a timbre class is checked out.
    #[error("Voice pool exhausted for {class:?}")]
    PoolExhausted { class: TimbreClass },

    /// Every processing node of a kind is checked out.
    #[error("Node pool exhausted for {kind:?}")]
    NodePoolExhausted { kind: NodeKind },

    /// A handle refers to a slot that has since been released or stolen.
    #[error("Stale voice handle")]
    StaleHandle,

    /// Configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
