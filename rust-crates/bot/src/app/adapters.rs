//! Runtime choice between the Telegram adapters and their offline stand-ins.

use crate::app::{
    actix_command_api::ActixCommandApi,
    command_source::{
        CommandSource,
        IncomingCommand,
    },
    telegram::TelegramClient,
    telegram_updates::TelegramCommandSource,
};
use momentum_engine::{
    collaborators::{
        AuthorizationOracle,
        Notifier,
        NotifyError,
    },
    model::{
        ChatId,
        MessageRef,
        UserId,
    },
};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{
            AtomicI64,
            Ordering,
        },
    },
};
use tracing::info;

/// Writes every outgoing message to the log instead of a chat.
#[derive(Debug, Default)]
pub struct LogNotifier {
    last_message: AtomicI64,
}

impl Notifier for LogNotifier {
    async fn post_or_update(
        &self,
        chat: ChatId,
        existing: Option<MessageRef>,
        text: &str,
    ) -> Result<MessageRef, NotifyError> {
        let message = match existing {
            Some(message) => message,
            None => MessageRef(self.last_message.fetch_add(1, Ordering::Relaxed) + 1),
        };
        info!(%chat, %message, edited = existing.is_some(), "status message:\n{text}");
        Ok(message)
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), NotifyError> {
        info!(%chat, "message:\n{text}");
        Ok(())
    }
}

/// Fixed admin list. Private chats are privileged like on Telegram.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorization {
    admins: HashSet<UserId>,
}

impl StaticAuthorization {
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl AuthorizationOracle for StaticAuthorization {
    async fn is_privileged(&self, chat: ChatId, user: UserId) -> bool {
        chat.is_private() || self.admins.contains(&user)
    }
}

pub enum Notifiers {
    Telegram(Arc<TelegramClient>),
    Log(LogNotifier),
}

impl Notifier for Notifiers {
    async fn post_or_update(
        &self,
        chat: ChatId,
        existing: Option<MessageRef>,
        text: &str,
    ) -> Result<MessageRef, NotifyError> {
        match self {
            Notifiers::Telegram(client) => client.post_or_update(chat, existing, text).await,
            Notifiers::Log(notifier) => notifier.post_or_update(chat, existing, text).await,
        }
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), NotifyError> {
        match self {
            Notifiers::Telegram(client) => client.send(chat, text).await,
            Notifiers::Log(notifier) => notifier.send(chat, text).await,
        }
    }
}

pub enum Authorizations {
    Telegram(Arc<TelegramClient>),
    Static(StaticAuthorization),
}

impl AuthorizationOracle for Authorizations {
    async fn is_privileged(&self, chat: ChatId, user: UserId) -> bool {
        match self {
            Authorizations::Telegram(client) => client.is_privileged(chat, user).await,
            Authorizations::Static(admins) => admins.is_privileged(chat, user).await,
        }
    }
}

pub enum CommandSources {
    Telegram(TelegramCommandSource),
    Http(ActixCommandApi),
}

impl CommandSource for CommandSources {
    async fn next_command(&mut self) -> crate::Result<IncomingCommand> {
        match self {
            CommandSources::Telegram(source) => source.next_command().await,
            CommandSources::Http(api) => api.next_command().await,
        }
    }
}
