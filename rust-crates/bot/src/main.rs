use anyhow::Context;
use clap::Parser;
use momentum_bot::{
    app::{
        App,
        actix_command_api::ActixCommandApi,
        adapters::{
            Authorizations,
            CommandSources,
            LogNotifier,
            Notifiers,
            StaticAuthorization,
        },
        http_ledger::HttpLedgerClient,
        init_tracing,
        sled_storage::SledStateStorage,
        telegram::TelegramClient,
        telegram_updates::TelegramCommandSource,
    },
    config::Args,
};
use momentum_engine::{
    EventEngine,
    collaborators::StateStorage,
    commands::CommandHandler,
    persistence::{
        InMemoryStateStorage,
        spawn_writer,
    },
};
use std::{
    env::current_dir,
    fs,
    sync::Arc,
    time::Duration,
};

const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = if args.tracing || args.log_dir.is_some() {
        if let Some(dir) = &args.log_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
        }
        init_tracing(args.log_dir.as_deref())
    } else {
        None
    };

    if args.ephemeral {
        tracing::info!("Using in-memory state; nothing survives a restart");
        return serve(args, InMemoryStateStorage::new()).await;
    }

    let storage_path = match &args.state_dir {
        Some(path) => path.clone(),
        None => current_dir()
            .context("determine process working directory")?
            .join("momentum_bot_data"),
    };
    fs::create_dir_all(&storage_path)?;
    tracing::info!("Using sled storage directory: {}", storage_path.display());
    let storage = SledStateStorage::open(&storage_path)?;
    serve(args, storage).await
}

async fn serve<S: StateStorage>(args: Args, storage: S) -> anyhow::Result<()> {
    let snapshot = storage.load().context("loading saved state")?;
    let (persistence, writer) = spawn_writer(storage);

    let ledger = HttpLedgerClient::new(args.ledger_url.clone(), args.ledger_api_key.clone())?;
    let mut config = args.engine_config();
    let (notifier, authorization, commands) = match &args.bot_token {
        Some(token) => {
            let client = Arc::new(TelegramClient::new(&args.telegram_api_url, token)?);
            if config.bot_username.is_none() {
                match client.bot_username().await {
                    Ok(username) => config.bot_username = username,
                    Err(err) => tracing::warn!(%err, "could not look up the bot username"),
                }
            }
            tracing::info!("Polling Telegram for commands");
            (
                Notifiers::Telegram(client.clone()),
                Authorizations::Telegram(client.clone()),
                CommandSources::Telegram(TelegramCommandSource::new(client)),
            )
        }
        None => {
            tracing::warn!("No bot token; chat messages are logged instead of sent");
            (
                Notifiers::Log(LogNotifier::default()),
                Authorizations::Static(StaticAuthorization::new(args.admin_ids())),
                CommandSources::Http(ActixCommandApi::new(args.port).await?),
            )
        }
    };

    if !config.transactions_enabled {
        tracing::warn!("Transactions are disabled; rounds close without trading");
    }
    let engine = EventEngine::recover(
        config,
        Arc::new(ledger),
        Arc::new(notifier),
        persistence,
        snapshot,
    )
    .await;
    let handler = CommandHandler::new(engine, Arc::new(authorization));
    let mut app = App::new(commands, handler);

    tracing::info!("Starting momentum bot");
    if let Err(err) = app.run_until_exit(handle_interupt).await {
        tracing::error!(?err, "command source failed, shutting down");
    }

    // the writer drains once every persistence handle is gone
    drop(app);
    match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer).await {
        Ok(Ok(_)) => tracing::info!("Saved state flushed"),
        Ok(Err(err)) => tracing::error!(%err, "state writer panicked"),
        Err(_) => tracing::warn!("Timed out waiting for the state writer"),
    }
    tracing::info!("Exiting momentum bot");
    Ok(())
}
