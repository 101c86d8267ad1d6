//! Chat command parsing and the handler that gates and dispatches them.

use crate::{
    collaborators::{
        AuthorizationOracle,
        LedgerClient,
        Notifier,
    },
    error::{
        EngineError,
        ValidationError,
    },
    event::{
        CompletionCheck,
        EventEngine,
        EventPhase,
        MoveReport,
    },
    messages,
    model::{
        BoosterKind,
        ChatId,
        Direction,
        UserId,
    },
};
use std::{
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartRound {
        initial: i64,
    },
    MoveScore(Direction),
    ApplyBooster {
        kind: BoosterKind,
        direction: Direction,
    },
    StopRound,
    QueryStatus,
    Inventory,
    Shop,
    GrantBooster {
        user: UserId,
        kind: BoosterKind,
        count: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message is not a command")]
    NotACommand,

    #[error("unknown command `{0}`")]
    Unknown(String),

    #[error("invalid argument `{0}`")]
    InvalidArgument(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl Command {
    /// Commands that only make sense in the event chat.
    pub fn is_event_command(&self) -> bool {
        !matches!(self, Command::Inventory | Command::Shop)
    }
}

impl Command {
    /// Parses `text`, ignoring commands addressed to another bot through an
    /// `@name` suffix. Without a known `bot_username` every suffix is accepted.
    pub fn parse_addressed(text: &str, bot_username: Option<&str>) -> Result<Self, ParseError> {
        let mut words = text.split_whitespace();
        let head = words.next().ok_or(ParseError::NotACommand)?;
        let slash = head.starts_with('/');
        let head = head.trim_start_matches('/');
        let (name, mention) = match head.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (head, None),
        };
        if let (Some(mention), Some(bot)) = (mention, bot_username)
            && !mention.eq_ignore_ascii_case(bot.trim_start_matches('@'))
        {
            return Err(ParseError::NotACommand);
        }
        let name = name.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        // boosters only count as the whole message
        if let Some((direction, magnitude)) = booster_command(&name) {
            if !args.is_empty() {
                return Err(ParseError::NotACommand);
            }
            return BoosterKind::from_magnitude(magnitude)
                .map(|kind| Command::ApplyBooster { kind, direction })
                .ok_or_else(|| ValidationError::UnknownBooster(name.clone()).into());
        }
        if !slash {
            return Err(ParseError::NotACommand);
        }

        match name.as_str() {
            "pumpordump" => parse_start(&args),
            "pump" => Ok(Command::MoveScore(Direction::Pump)),
            "dump" => Ok(Command::MoveScore(Direction::Dump)),
            "stopevent" => Ok(Command::StopRound),
            "eventstatus" => Ok(Command::QueryStatus),
            "shop" | "start" => Ok(Command::Shop),
            "inventory" => Ok(Command::Inventory),
            "grant" => parse_grant(&args),
            _ => Err(ParseError::Unknown(name.clone())),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse_addressed(text, None)
    }
}

/// `pumpN` / `dumpN` with a decimal magnitude.
fn booster_command(name: &str) -> Option<(Direction, u64)> {
    let (direction, digits) = if let Some(digits) = name.strip_prefix("pump") {
        (Direction::Pump, digits)
    } else {
        (Direction::Dump, name.strip_prefix("dump")?)
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|magnitude| (direction, magnitude))
}

/// `/pumpOrDump [pumpN | dumpN | dump-N]`; dump values are always negative.
fn parse_start(args: &[&str]) -> Result<Command, ParseError> {
    let initial = match args {
        [] => 0,
        [arg] => {
            let lowered = arg.to_ascii_lowercase();
            let invalid = || ParseError::InvalidArgument(arg.to_string());
            if let Some(value) = lowered.strip_prefix("pump") {
                value.parse::<i64>().map_err(|_| invalid())?
            } else if let Some(value) = lowered.strip_prefix("dump") {
                let value = value.parse::<i64>().map_err(|_| invalid())?;
                if value < 0 { value } else { -value }
            } else {
                return Err(invalid());
            }
        }
        [_, extra, ..] => return Err(ParseError::InvalidArgument(extra.to_string())),
    };
    Ok(Command::StartRound { initial })
}

/// `/grant <userId> <kind> [count]`
fn parse_grant(args: &[&str]) -> Result<Command, ParseError> {
    let (user, kind, count) = match args {
        [user, kind] => (user, kind, None),
        [user, kind, count] => (user, kind, Some(count)),
        _ => return Err(ParseError::InvalidArgument(args.join(" "))),
    };
    let user = user
        .parse::<i64>()
        .map(UserId)
        .map_err(|_| ParseError::InvalidArgument(user.to_string()))?;
    let kind = kind.parse::<BoosterKind>()?;
    let count = match count {
        Some(count) => count
            .parse::<u32>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| ParseError::InvalidArgument(count.to_string()))?,
        None => 1,
    };
    Ok(Command::GrantBooster { user, kind, count })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Not for us, or outside the event chat; nothing is sent back.
    Ignored,
}

pub struct CommandHandler<L, N, A> {
    engine: Arc<EventEngine<L, N>>,
    auth: Arc<A>,
}

impl<L, N, A> CommandHandler<L, N, A>
where
    L: LedgerClient,
    N: Notifier,
    A: AuthorizationOracle,
{
    pub fn new(engine: Arc<EventEngine<L, N>>, auth: Arc<A>) -> Self {
        Self { engine, auth }
    }

    pub fn engine(&self) -> &Arc<EventEngine<L, N>> {
        &self.engine
    }

    pub async fn handle(&self, chat: ChatId, user: UserId, text: &str) -> Reply {
        let in_event_chat = self.engine.config().is_event_chat(chat);
        let bot_username = self.engine.config().bot_username.as_deref();
        let command = match Command::parse_addressed(text, bot_username) {
            Ok(command) => command,
            Err(ParseError::Validation(err)) if in_event_chat => {
                return Reply::Text(messages::error(&EngineError::from(err)));
            }
            Err(err) => {
                debug!(%chat, %user, %err, "ignoring message");
                return Reply::Ignored;
            }
        };
        if command.is_event_command() && !in_event_chat {
            debug!(%chat, ?command, "event command outside the event chat");
            return Reply::Ignored;
        }
        Reply::Text(self.dispatch(chat, user, command).await)
    }

    async fn dispatch(&self, chat: ChatId, user: UserId, command: Command) -> String {
        match command {
            Command::StartRound { initial } => {
                if !self.auth.is_privileged(chat, user).await {
                    return messages::ADMIN_ONLY.to_string();
                }
                match self.engine.start(chat, initial).await {
                    Ok(started) => {
                        self.spawn_status_refresh();
                        messages::round_started(started.initial, started.thresholds)
                    }
                    Err(err) => messages::error(&err),
                }
            }
            Command::StopRound => {
                if !self.auth.is_privileged(chat, user).await {
                    return messages::ADMIN_ONLY.to_string();
                }
                match self.engine.stop().await {
                    Ok(final_score) => messages::round_stopped(final_score),
                    Err(err) => messages::error(&err),
                }
            }
            Command::MoveScore(direction) => {
                if let Some(refusal) = self.refuse_player(chat, user).await {
                    return refusal;
                }
                match self.engine.move_score(user, direction).await {
                    Ok(report) => {
                        let score = report.score;
                        self.after_move(report);
                        messages::moved(direction, score)
                    }
                    Err(err) => messages::error(&err),
                }
            }
            Command::ApplyBooster { kind, direction } => {
                if let Some(refusal) = self.refuse_player(chat, user).await {
                    return refusal;
                }
                match self.engine.apply_booster(user, kind, direction).await {
                    Ok(report) => {
                        let text = if report.consumed {
                            messages::booster_applied(
                                kind,
                                report.applied_delta,
                                report.score,
                                report.remaining,
                            )
                        } else {
                            messages::booster_missing(
                                kind,
                                report.requested_delta,
                                report.applied_delta,
                                report.score,
                            )
                        };
                        self.after_move(report);
                        text
                    }
                    Err(err) => messages::error(&err),
                }
            }
            Command::QueryStatus => match self.engine.status().await {
                Ok(view) => messages::event_status(
                    view.phase == EventPhase::Active,
                    view.phase == EventPhase::Completing,
                    view.score,
                    view.thresholds,
                ),
                Err(err) => messages::error(&err),
            },
            Command::Shop => messages::shop(),
            Command::Inventory => messages::inventory(&self.engine.inventory_of(user)),
            Command::GrantBooster {
                user: recipient,
                kind,
                count,
            } => {
                if !self.auth.is_privileged(chat, user).await {
                    return messages::ADMIN_ONLY.to_string();
                }
                let total = self.engine.grant(recipient, kind, count).await;
                messages::granted(kind, count, total)
            }
        }
    }

    async fn refuse_player(&self, chat: ChatId, user: UserId) -> Option<String> {
        if self.engine.config().is_exempt(user) {
            return None;
        }
        self.auth
            .is_privileged(chat, user)
            .await
            .then(|| messages::ADMINS_CANNOT_PLAY.to_string())
    }

    fn after_move(&self, report: MoveReport) {
        if matches!(report.completion, CompletionCheck::Continues) {
            self.spawn_status_refresh();
        }
    }

    fn spawn_status_refresh(&self) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.refresh_status_message().await;
        });
    }
}
