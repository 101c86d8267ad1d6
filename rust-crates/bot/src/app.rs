use crate::{
    Result,
    app::command_source::{
        CommandSource,
        IncomingCommand,
    },
};
use momentum_engine::{
    collaborators::{
        AuthorizationOracle,
        LedgerClient,
        Notifier,
    },
    commands::CommandHandler,
};
use std::{
    path::Path,
    sync::Arc,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

pub mod actix_command_api;
pub mod adapters;
pub mod command_source;
pub mod http_ledger;
pub mod sled_storage;
pub mod telegram;
pub mod telegram_updates;

#[cfg(test)]
pub(crate) mod fake_http;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Continue,
    Exit,
}

pub struct App<Commands, L, N, A> {
    commands: Commands,
    handler: Arc<CommandHandler<L, N, A>>,
}

impl<Commands, L, N, A> App<Commands, L, N, A> {
    pub fn new(commands: Commands, handler: CommandHandler<L, N, A>) -> Self {
        Self {
            commands,
            handler: Arc::new(handler),
        }
    }
}

impl<Commands, L, N, A> App<Commands, L, N, A>
where
    Commands: CommandSource,
    L: LedgerClient,
    N: Notifier,
    A: AuthorizationOracle,
{
    /// Waits for the next command or the interrupt. Each command runs in its
    /// own task so slow collaborators never stall the loop.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        tokio::select! {
            _ = interrupt => {
                tracing::info!("interrupt received, stopping command loop");
                Ok(RunState::Exit)
            }
            command = self.commands.next_command() => {
                self.dispatch(command?);
                Ok(RunState::Continue)
            }
        }
    }

    /// Serves commands until an interrupt fires. A failing command source
    /// ends the loop with its error instead of unwinding past the caller's
    /// shutdown steps.
    pub async fn run_until_exit<F, Fut>(&mut self, mut interrupt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            match self.run(interrupt()).await? {
                RunState::Continue => continue,
                RunState::Exit => return Ok(()),
            }
        }
    }

    fn dispatch(&self, command: IncomingCommand) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let IncomingCommand {
                chat,
                user,
                text,
                respond,
            } = command;
            let reply = handler.handle(chat, user, &text).await;
            if respond.send(reply).is_err() {
                tracing::debug!(%chat, %user, "requester went away before the reply");
            }
        });
    }
}

/// Logs to stdout, or to a daily rolling file under `log_dir`. Keep the
/// returned guard alive for as long as file logging should flush.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "momentum-bot.log"));
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = fmt().with_env_filter(filter).try_init();
            None
        }
    }
}
