//! Errors surfaced by the event engine.

use crate::{
    guard::Busy,
    model::UserId,
};
use std::time::Duration;
use thiserror::Error;

/// Rejections that leave all state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a round is already active at {score}")]
    AlreadyActive { score: i64 },

    #[error("no round is active")]
    NotActive,

    #[error("initial value {initial} reaches the pump threshold {threshold}")]
    InitialReachesPump { initial: i64, threshold: i64 },

    #[error("initial value {initial} reaches the dump threshold -{threshold}")]
    InitialReachesDump { initial: i64, threshold: i64 },

    #[error("unknown booster kind `{0}`")]
    UnknownBooster(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event lock stayed held for the whole polling budget.
    #[error("event lock is busy")]
    Busy,

    #[error("user {0} already has a command in flight")]
    UserBusy(UserId),

    #[error("threshold computation timed out after {0:?}")]
    ThresholdTimeout(Duration),
}

impl From<Busy> for EngineError {
    fn from(_: Busy) -> Self {
        EngineError::Busy
    }
}
