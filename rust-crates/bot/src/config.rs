use crate::app::telegram::DEFAULT_API_URL;
use clap::Parser;
use momentum_engine::{
    EngineConfig,
    model::{
        ChatId,
        UserId,
    },
};
use std::{
    path::PathBuf,
    time::Duration,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about = "Pump-or-dump chat game bot", long_about = None)]
pub struct Args {
    /// Telegram bot token. Without one, messages go to the log.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, default_value = DEFAULT_API_URL)]
    pub telegram_api_url: Url,

    /// Username commands may be addressed to as `/cmd@name`. Looked up with
    /// the token when unset.
    #[arg(long, env = "TELEGRAM_BOT_USERNAME")]
    pub bot_username: Option<String>,

    /// Only chat that accepts game commands. Unset accepts any chat.
    #[arg(long, env = "EVENT_CHAT_ID", allow_hyphen_values = true)]
    pub event_chat_id: Option<i64>,

    /// Privileged user that may still move the score.
    #[arg(long = "exempt-user", value_name = "USER_ID")]
    pub exempt_users: Vec<i64>,

    /// Admin used when running without a bot token.
    #[arg(long = "admin", value_name = "USER_ID")]
    pub admins: Vec<i64>,

    #[arg(long, env = "LEDGER_URL")]
    pub ledger_url: Option<Url>,

    #[arg(long, env = "LEDGER_API_KEY", hide_env_values = true)]
    pub ledger_api_key: Option<String>,

    /// Close rounds without buying or selling.
    #[arg(long, env = "DISABLE_TRANSACTIONS")]
    pub disable_transactions: bool,

    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Keep state in memory only.
    #[arg(long, conflicts_with = "state_dir")]
    pub ephemeral: bool,

    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "false")]
    pub tracing: bool,

    #[arg(long, default_value = "TON")]
    pub reserve_symbol: String,

    #[arg(long, default_value = "TONDEV")]
    pub demand_symbol: String,

    #[arg(long, default_value_t = 15)]
    pub start_timeout_secs: u64,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            event_chat: self.event_chat_id.map(ChatId),
            exempt_users: self.exempt_users.iter().copied().map(UserId).collect(),
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            transactions_enabled: !self.disable_transactions,
            reserve_symbol: self.reserve_symbol.clone(),
            demand_symbol: self.demand_symbol.clone(),
            bot_username: self.bot_username.clone(),
            ..EngineConfig::default()
        }
    }

    pub fn admin_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.admins.iter().copied().map(UserId)
    }
}
