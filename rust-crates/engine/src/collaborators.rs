//! Seams to the outside world. The engine only ever talks to these traits.

use crate::{
    model::{
        ChatId,
        MessageRef,
        StateSnapshot,
        UserId,
    },
    retry::{
        Classify,
        ErrorClass,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    future::Future,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger network error: {0}")]
    Network(String),

    #[error("ledger rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("ledger is not configured: {0}")]
    Configuration(String),

    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

impl Classify for LedgerError {
    fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Network(_) => ErrorClass::Transient,
            LedgerError::RateLimited { retry_after } => ErrorClass::RateLimited {
                retry_after: *retry_after,
            },
            LedgerError::Configuration(_) | LedgerError::Rejected(_) => ErrorClass::Fatal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub reference: String,
    pub summary: String,
}

/// Balances are in nano units of the respective token.
pub trait LedgerClient: Send + Sync + 'static {
    /// Balance of the reserve token (denominator of the threshold ratio).
    fn reserve_balance(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Balance of the demand token (numerator of the threshold ratio).
    fn demand_balance(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    fn buy(&self) -> impl Future<Output = Result<TradeReceipt, LedgerError>> + Send;

    fn sell(&self) -> impl Future<Output = Result<TradeReceipt, LedgerError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("chat network error: {0}")]
    Network(String),

    #[error("chat rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("message to edit was not found")]
    MessageNotFound,

    #[error("chat rejected the request: {0}")]
    Rejected(String),
}

impl Classify for NotifyError {
    fn class(&self) -> ErrorClass {
        match self {
            NotifyError::Network(_) => ErrorClass::Transient,
            NotifyError::RateLimited { retry_after } => ErrorClass::RateLimited {
                retry_after: *retry_after,
            },
            NotifyError::MessageNotFound | NotifyError::Rejected(_) => ErrorClass::Fatal,
        }
    }
}

pub trait Notifier: Send + Sync + 'static {
    /// Edits `existing` when given, otherwise posts and pins a new message.
    /// Unchanged content counts as success.
    fn post_or_update(
        &self,
        chat: ChatId,
        existing: Option<MessageRef>,
        text: &str,
    ) -> impl Future<Output = Result<MessageRef, NotifyError>> + Send;

    fn send(
        &self,
        chat: ChatId,
        text: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

pub trait AuthorizationOracle: Send + Sync + 'static {
    fn is_privileged(
        &self,
        chat: ChatId,
        user: UserId,
    ) -> impl Future<Output = bool> + Send;
}

pub trait StateStorage: Send + 'static {
    /// retrieve the last saved snapshot, if any
    fn load(&self) -> anyhow::Result<Option<StateSnapshot>>;

    /// write or overwrite the saved snapshot
    fn save(&mut self, snapshot: &StateSnapshot) -> anyhow::Result<()>;
}
