//! Error types shared by the host-facing surface

use crate::config::ConfigError;
use crate::fiber::ContextError;
use crate::serializer::SnapshotError;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("System is not powered")]
    NotPowered,

    #[error("No component nominated a primary clock domain")]
    NoPrimary,

    #[error("Component wiring error: {0}")]
    Wiring(String),

    #[error("Invalid save slot: {0}")]
    InvalidSlot(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
