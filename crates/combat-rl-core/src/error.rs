//! Error types for the combat RL core library

use thiserror::Error;

use crate::id::{AgentClass, AgentId};

/// Core error type for combat RL operations
#[derive(Error, Debug)]
pub enum CombatError {
    /// Function approximator failed to build or produced unusable output
    #[error("Network error: {0}")]
    Network(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Behavior profile could not be used
    #[error("Profile error: {0}")]
    Profile(String),

    /// Stored checksum does not match the payload
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the document
        expected: String,
        /// Checksum computed from the payload
        actual: String,
    },

    /// Structural validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Agent could not be constructed
    #[error("Failed to construct {class:?} agent: {reason}")]
    AgentConstruction {
        /// Class of the agent being built
        class: AgentClass,
        /// Why construction failed
        reason: String,
    },

    /// Agent is not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for combat RL operations
pub type Result<T> = std::result::Result<T, CombatError>;
