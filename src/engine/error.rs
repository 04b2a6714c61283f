use thiserror::Error;
use ulid::Ulid;

use crate::model::Span;
use crate::slots::RangeError;

use super::availability::DataIntegrityError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("resource {0} is closed for booking")]
    ResourceDisabled(Ulid),
    #[error("invalid operating window: {0}")]
    InvalidWindow(String),
    #[error("new operating window {window} excludes {count} active booking(s)")]
    WindowExcludesBookings { window: Span, count: usize },
    #[error("data integrity violation: {0}")]
    DataIntegrity(#[from] DataIntegrityError),
    #[error("slot generation: {0}")]
    Slots(#[from] RangeError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
