//! Error handling - Hierarchical errors for the spread pipeline

use thiserror::Error;

use crate::trigger::ActivationError;

pub type Result<T> = std::result::Result<T, Error>;

/// spread-tx error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket / file IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected trigger activation (existing state untouched)
    #[error("Invalid activation: {0}")]
    Activation(#[from] ActivationError),

    /// Execution dispatch failed (budget is not consumed)
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Order-entry collaborator errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
