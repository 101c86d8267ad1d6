use crate::{
    guard::LockPolicy,
    model::{
        ChatId,
        UserId,
    },
    retry::RetryPolicy,
    thresholds::ThresholdPolicy,
};
use std::{
    collections::HashSet,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chat the game runs in. `None` accepts event commands from any chat.
    pub event_chat: Option<ChatId>,
    /// Commands with an `@name` suffix for any other bot are ignored.
    pub bot_username: Option<String>,
    /// Privileged users that may still move the score.
    pub exempt_users: HashSet<UserId>,
    pub thresholds: ThresholdPolicy,
    pub locks: LockPolicy,
    pub retry: RetryPolicy,
    pub start_timeout: Duration,
    pub message_error_cooldown: Duration,
    pub rate_limit_fallback: Duration,
    pub transactions_enabled: bool,
    pub reserve_symbol: String,
    pub demand_symbol: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_chat: None,
            bot_username: None,
            exempt_users: HashSet::new(),
            thresholds: ThresholdPolicy::default(),
            locks: LockPolicy::default(),
            retry: RetryPolicy::default(),
            start_timeout: Duration::from_secs(15),
            message_error_cooldown: Duration::from_secs(10),
            rate_limit_fallback: Duration::from_secs(5),
            transactions_enabled: true,
            reserve_symbol: "TON".to_string(),
            demand_symbol: "TONDEV".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn is_event_chat(&self, chat: ChatId) -> bool {
        self.event_chat.is_none_or(|event_chat| event_chat == chat)
    }

    pub fn is_exempt(&self, user: UserId) -> bool {
        self.exempt_users.contains(&user)
    }
}
