//! Chat commands pulled from the Bot API with `getUpdates` long polling.

use crate::app::{
    command_source::{
        CommandSource,
        IncomingCommand,
    },
    telegram::{
        TelegramClient,
        Update,
    },
};
use anyhow::anyhow;
use momentum_engine::{
    collaborators::{
        Notifier,
        NotifyError,
    },
    commands::Reply,
    model::{
        ChatId,
        UserId,
    },
};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{
    debug,
    warn,
};

/// Must stay below the client's request timeout.
const POLL_TIMEOUT: Duration = Duration::from_secs(25);
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct TelegramCommandSource {
    client: Arc<TelegramClient>,
    offset: i64,
    poll_timeout: Duration,
    retry_delay: Duration,
    pending: VecDeque<IncomingCommand>,
}

impl TelegramCommandSource {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self {
            client,
            offset: 0,
            poll_timeout: POLL_TIMEOUT,
            retry_delay: RETRY_DELAY,
            pending: VecDeque::new(),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn accept(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            let (Some(text), Some(from)) = (message.text, message.from) else {
                continue;
            };
            let chat = ChatId(message.chat.id);
            let (command, reply) = IncomingCommand::new(chat, UserId(from.id), text);
            tokio::spawn(deliver_reply(self.client.clone(), chat, reply));
            self.pending.push_back(command);
        }
    }
}

impl CommandSource for TelegramCommandSource {
    async fn next_command(&mut self) -> crate::Result<IncomingCommand> {
        loop {
            if let Some(command) = self.pending.pop_front() {
                return Ok(command);
            }

            match self.client.updates(self.offset, self.poll_timeout).await {
                Ok(updates) => {
                    debug!(count = updates.len(), offset = self.offset, "received updates");
                    self.accept(updates);
                }
                Err(NotifyError::Rejected(reason)) => {
                    return Err(anyhow!("Telegram rejected getUpdates: {reason}"));
                }
                Err(err) => {
                    let delay = match &err {
                        NotifyError::RateLimited {
                            retry_after: Some(retry_after),
                        } => *retry_after,
                        _ => self.retry_delay,
                    };
                    warn!(%err, delay_ms = delay.as_millis() as u64, "polling for updates failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn deliver_reply(client: Arc<TelegramClient>, chat: ChatId, reply: oneshot::Receiver<Reply>) {
    let Ok(Reply::Text(text)) = reply.await else {
        return;
    };
    if let Err(err) = client.send(chat, &text).await {
        warn!(%chat, %err, "failed to send reply");
    }
}
