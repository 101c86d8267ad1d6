use momentum_engine::{
    commands::Reply,
    model::{
        ChatId,
        UserId,
    },
};
use tokio::sync::oneshot;

pub trait CommandSource {
    fn next_command(&mut self) -> impl Future<Output = crate::Result<IncomingCommand>>;
}

/// One chat message addressed to the bot, with a channel for its reply.
#[derive(Debug)]
pub struct IncomingCommand {
    pub chat: ChatId,
    pub user: UserId,
    pub text: String,
    pub respond: oneshot::Sender<Reply>,
}

impl IncomingCommand {
    pub fn new(
        chat: ChatId,
        user: UserId,
        text: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Reply>) {
        let (respond, reply) = oneshot::channel();
        let command = Self {
            chat,
            user,
            text: text.into(),
            respond,
        };
        (command, reply)
    }
}
