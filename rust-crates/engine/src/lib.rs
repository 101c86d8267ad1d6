pub mod boosters;

pub mod collaborators;

pub mod commands;

pub mod config;

pub mod error;

pub mod event;

pub mod guard;

pub mod messages;

pub mod model;

pub mod persistence;

pub mod retry;

pub mod thresholds;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::EngineConfig;
pub use error::{
    EngineError,
    ValidationError,
};
pub use event::EventEngine;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
