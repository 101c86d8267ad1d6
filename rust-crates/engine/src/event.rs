//! The round lifecycle: Idle → Active → Completing → Idle.
//!
//! Every mutation of [`EventState`] happens behind the event lock held by
//! [`ConcurrencyGuard`]. Completion closes the round before the terminal
//! trade is dispatched, so a trade can never be observed by (or reopen) the
//! round that caused it.

use crate::{
    Result,
    boosters,
    collaborators::{
        LedgerClient,
        LedgerError,
        Notifier,
        NotifyError,
        TradeReceipt,
    },
    config::EngineConfig,
    error::{
        EngineError,
        ValidationError,
    },
    guard::{
        ConcurrencyGuard,
        FlightGuard,
        lock,
    },
    messages,
    model::{
        BoosterKind,
        ChatId,
        Direction,
        EventState,
        MessageRef,
        Outcome,
        StateSnapshot,
        UserId,
        UserInventory,
    },
    persistence::PersistenceHandle,
    retry::{
        Classify,
        ErrorClass,
        RetryPolicy,
        retry,
    },
    thresholds::{
        Balances,
        ThresholdCalculator,
        Thresholds,
    },
};
use std::{
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        Weak,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{
    error,
    info,
    warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Idle,
    Active,
    /// The round is closed and its terminal trade is still running.
    Completing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    pub phase: EventPhase,
    pub score: i64,
    pub thresholds: Option<Thresholds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundStarted {
    pub initial: i64,
    pub thresholds: Thresholds,
    pub balances: Balances,
}

#[derive(Debug)]
pub struct MoveReport {
    pub requested_delta: i64,
    pub applied_delta: i64,
    pub booster: Option<BoosterKind>,
    pub consumed: bool,
    pub score: i64,
    pub remaining: u32,
    pub completion: CompletionCheck,
}

#[derive(Debug)]
pub enum CompletionCheck {
    /// Another caller already closed the round.
    Inactive,
    Continues,
    /// A threshold is crossed but the previous round's trade is still in
    /// flight; the next score change re-evaluates.
    Deferred,
    Completed(Completion),
}

#[derive(Debug)]
pub struct Completion {
    pub outcome: Outcome,
    pub final_score: i64,
    pub threshold: i64,
    pub action: JoinHandle<TerminalReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReport {
    Executed(TradeReceipt),
    Disabled,
    Failed(LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusRefresh {
    Inactive,
    /// Another refresh holds the message-update flight.
    InFlight,
    Posted(MessageRef),
    Failed(NotifyError),
}

pub struct EventEngine<L, N> {
    this: Weak<Self>,
    config: EngineConfig,
    guard: ConcurrencyGuard,
    inventory: Mutex<UserInventory>,
    thresholds: ThresholdCalculator<L>,
    ledger: Arc<L>,
    notifier: Arc<N>,
    persistence: PersistenceHandle,
}

impl<L: LedgerClient, N: Notifier> EventEngine<L, N> {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<L>,
        notifier: Arc<N>,
        persistence: PersistenceHandle,
    ) -> Arc<Self> {
        Self::with_state(
            config,
            ledger,
            notifier,
            persistence,
            EventState::default(),
            UserInventory::default(),
        )
    }

    fn with_state(
        config: EngineConfig,
        ledger: Arc<L>,
        notifier: Arc<N>,
        persistence: PersistenceHandle,
        state: EventState,
        inventory: UserInventory,
    ) -> Arc<Self> {
        let thresholds =
            ThresholdCalculator::new(ledger.clone(), config.thresholds, config.retry);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            guard: ConcurrencyGuard::new(state, config.locks),
            inventory: Mutex::new(inventory),
            thresholds,
            ledger,
            notifier,
            persistence,
            config,
        })
    }

    /// Rebuilds the engine from the last saved snapshot. An active round
    /// saved without thresholds gets them computed once; an inactive one is
    /// brought back to the Idle shape.
    pub async fn recover(
        config: EngineConfig,
        ledger: Arc<L>,
        notifier: Arc<N>,
        persistence: PersistenceHandle,
        snapshot: Option<StateSnapshot>,
    ) -> Arc<Self> {
        let Some(snapshot) = snapshot else {
            info!("no saved state, starting idle");
            return Self::new(config, ledger, notifier, persistence);
        };
        let mut state = snapshot.event;
        let inventory = snapshot.inventory.normalized();
        if !state.is_active {
            state = EventState::default();
        }
        let engine = Self::with_state(
            config,
            ledger,
            notifier,
            persistence,
            state,
            inventory,
        );
        {
            let mut state = engine.guard.lock_event().await;
            if state.is_active && state.thresholds().is_none() {
                let snapshot = engine.thresholds.compute(false).await;
                state.pump_threshold = Some(snapshot.thresholds.pump);
                state.dump_threshold = Some(snapshot.thresholds.dump);
                warn!(
                    pump = snapshot.thresholds.pump,
                    dump = snapshot.thresholds.dump,
                    "recovered active round without thresholds"
                );
            }
            info!(
                active = state.is_active,
                score = state.finish_result,
                users_with_boosters = lock(&engine.inventory).users_with_boosters(),
                "recovered state"
            );
            engine.persist(&state);
        }
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn start(&self, chat: ChatId, initial: i64) -> Result<RoundStarted> {
        let mut state = self.guard.acquire_event().await?;
        if state.is_active {
            return Err(ValidationError::AlreadyActive {
                score: state.finish_result,
            }
            .into());
        }

        let started = self.open_round(&mut state, chat, initial).await;
        match started {
            Ok(started) => {
                self.persist(&state);
                info!(
                    %chat,
                    initial,
                    pump = started.thresholds.pump,
                    dump = started.thresholds.dump,
                    "round started"
                );
                Ok(started)
            }
            Err(err) => {
                state.reset();
                warn!(%chat, initial, %err, "round start rejected");
                Err(err)
            }
        }
    }

    async fn open_round(
        &self,
        state: &mut EventState,
        chat: ChatId,
        initial: i64,
    ) -> Result<RoundStarted> {
        let snapshot =
            tokio::time::timeout(self.config.start_timeout, self.thresholds.compute(false))
                .await
                .map_err(|_| EngineError::ThresholdTimeout(self.config.start_timeout))?;
        let thresholds = snapshot.thresholds;
        if initial >= thresholds.pump {
            return Err(ValidationError::InitialReachesPump {
                initial,
                threshold: thresholds.pump,
            }
            .into());
        }
        if initial <= -thresholds.dump {
            return Err(ValidationError::InitialReachesDump {
                initial,
                threshold: thresholds.dump,
            }
            .into());
        }
        state.activate(chat, initial, thresholds);
        Ok(RoundStarted {
            initial,
            thresholds,
            balances: snapshot.balances,
        })
    }

    pub async fn move_score(&self, user: UserId, direction: Direction) -> Result<MoveReport> {
        self.apply(user, None, direction).await
    }

    pub async fn apply_booster(
        &self,
        user: UserId,
        kind: BoosterKind,
        direction: Direction,
    ) -> Result<MoveReport> {
        self.apply(user, Some(kind), direction).await
    }

    async fn apply(
        &self,
        user: UserId,
        booster: Option<BoosterKind>,
        direction: Direction,
    ) -> Result<MoveReport> {
        let requested_delta =
            booster.map_or(1, BoosterKind::magnitude) * direction.sign();
        let (applied_delta, consumed, score, remaining) = {
            let mut state = self.guard.acquire_event().await?;
            if !state.is_active {
                return Err(ValidationError::NotActive.into());
            }
            let (applied_delta, consumed, remaining) = match booster {
                None => (requested_delta, false, 0),
                Some(kind) => {
                    let _user = self
                        .guard
                        .lock_user(user)
                        .ok_or(EngineError::UserBusy(user))?;
                    let mut inventory = lock(&self.inventory);
                    let resolution =
                        boosters::resolve(&mut inventory, user, kind, requested_delta);
                    (
                        resolution.applied_delta,
                        resolution.consumed,
                        inventory.count(user, kind),
                    )
                }
            };
            let score = state.modify(applied_delta)?;
            self.persist(&state);
            (applied_delta, consumed, score, remaining)
        };
        info!(%user, ?booster, applied_delta, score, "score moved");

        let completion = self.check_completion().await;
        Ok(MoveReport {
            requested_delta,
            applied_delta,
            booster,
            consumed,
            score,
            remaining,
            completion,
        })
    }

    /// Closes the round if a threshold is reached and dispatches exactly one
    /// terminal trade. Safe to call any number of times concurrently.
    pub async fn check_completion(&self) -> CompletionCheck {
        let mut state = self.guard.lock_event().await;
        if !state.is_active {
            return CompletionCheck::Inactive;
        }
        let (Some(outcome), Some(thresholds)) = (state.outcome(), state.thresholds())
        else {
            return CompletionCheck::Continues;
        };
        let Some(flight) = self.guard.transaction().try_acquire() else {
            warn!(score = state.finish_result, "threshold reached while a trade is in flight");
            return CompletionCheck::Deferred;
        };

        let threshold = match outcome {
            Outcome::Pump => thresholds.pump,
            Outcome::Dump => -thresholds.dump,
        };
        let chat = state.event_chat_id.or(self.config.event_chat);
        let final_score = state.reset();
        self.persist(&state);
        drop(state);
        info!(%outcome, final_score, threshold, "round completed");

        let action = tokio::spawn(run_terminal_action(
            TerminalContext {
                ledger: self.ledger.clone(),
                notifier: self.notifier.clone(),
                config: self.config.clone(),
                chat,
                engine: self.this.clone(),
            },
            outcome,
            flight,
        ));
        CompletionCheck::Completed(Completion {
            outcome,
            final_score,
            threshold,
            action,
        })
    }

    /// Admin override. Returns the score the round held.
    pub async fn stop(&self) -> Result<i64> {
        let mut state = self.guard.acquire_event().await?;
        if !state.is_active {
            return Err(ValidationError::NotActive.into());
        }
        let final_score = state.reset();
        self.persist(&state);
        info!(final_score, "round stopped");
        Ok(final_score)
    }

    pub async fn status(&self) -> Result<StatusView> {
        let state = self.guard.acquire_event().await?;
        let phase = if state.is_active {
            EventPhase::Active
        } else if self.guard.transaction().is_held() {
            EventPhase::Completing
        } else {
            EventPhase::Idle
        };
        Ok(StatusView {
            phase,
            score: state.finish_result,
            thresholds: state.thresholds(),
        })
    }

    pub async fn event_state(&self) -> EventState {
        self.guard.lock_event().await.clone()
    }

    /// Posts or edits the live status message. Duplicate calls while one is
    /// in flight are dropped. After a failure the flight stays held for a
    /// cooldown unless the message was already pinned.
    pub async fn refresh_status_message(&self) -> StatusRefresh {
        let Some(flight) = self.guard.message_update().try_acquire() else {
            return StatusRefresh::InFlight;
        };
        let (chat, existing, score, thresholds) = {
            let state = self.guard.lock_event().await;
            match (state.is_active, state.event_chat_id, state.thresholds()) {
                (true, Some(chat), Some(thresholds)) => {
                    (chat, state.pinned_message_id, state.finish_result, thresholds)
                }
                _ => return StatusRefresh::Inactive,
            }
        };

        let balances = self.thresholds.compute(true).await.balances;
        let text = messages::status(&self.config, score, thresholds, balances);
        let notifier = self.notifier.as_ref();
        let posted = retry(&self.config.retry, "status message", || {
            notifier.post_or_update(chat, existing, &text)
        })
        .await;

        match posted {
            Ok(message) => {
                if existing != Some(message) {
                    self.record_status_message(chat, thresholds, message).await;
                }
                StatusRefresh::Posted(message)
            }
            Err(err) => {
                let err = err.into_inner();
                let pinned = self.guard.lock_event().await.pinned_message_id.is_some();
                if pinned {
                    drop(flight);
                } else {
                    let cooldown = self.message_cooldown(&err);
                    warn!(%err, cooldown_ms = cooldown.as_millis() as u64, "status message failed");
                    flight.release_after(cooldown);
                }
                StatusRefresh::Failed(err)
            }
        }
    }

    async fn record_status_message(
        &self,
        chat: ChatId,
        thresholds: Thresholds,
        message: MessageRef,
    ) {
        let mut state = self.guard.lock_event().await;
        let same_round = state.is_active
            && state.event_chat_id == Some(chat)
            && state.thresholds() == Some(thresholds);
        if same_round && state.pinned_message_id != Some(message) {
            state.pinned_message_id = Some(message);
            self.persist(&state);
            info!(%message, "status message recorded");
        }
    }

    fn message_cooldown(&self, err: &NotifyError) -> Duration {
        match err.class() {
            ErrorClass::RateLimited { retry_after } => {
                retry_after.unwrap_or(self.config.rate_limit_fallback) + Duration::from_secs(1)
            }
            _ => self.config.message_error_cooldown,
        }
    }

    pub async fn grant(&self, user: UserId, kind: BoosterKind, count: u32) -> u32 {
        let state = self.guard.lock_event().await;
        let total = lock(&self.inventory).grant(user, kind, count);
        self.persist(&state);
        info!(%user, %kind, count, total, "boosters granted");
        total
    }

    pub fn inventory_of(&self, user: UserId) -> Vec<(BoosterKind, u32)> {
        lock(&self.inventory).boosters(user)
    }

    /// Must not be called while the inventory lock is held.
    fn persist(&self, state: &EventState) {
        let snapshot = StateSnapshot::new(state.clone(), &lock(&self.inventory));
        self.persistence.submit(snapshot);
    }
}

struct TerminalContext<L, N> {
    ledger: Arc<L>,
    notifier: Arc<N>,
    config: EngineConfig,
    chat: Option<ChatId>,
    engine: Weak<EventEngine<L, N>>,
}

impl<L: LedgerClient, N: Notifier> TerminalContext<L, N> {
    async fn announce(&self, text: String) {
        let Some(chat) = self.chat else {
            return;
        };
        let notifier = self.notifier.as_ref();
        let sent = retry(&self.config.retry, "announcement", || notifier.send(chat, &text)).await;
        if let Err(err) = sent {
            warn!(%chat, %err, "announcement failed");
        }
    }

    async fn trade(&self, outcome: Outcome) -> std::result::Result<TradeReceipt, LedgerError> {
        let ledger = self.ledger.as_ref();
        let policy: &RetryPolicy = &self.config.retry;
        let traded = match outcome {
            Outcome::Pump => retry(policy, "buy", || ledger.buy()).await,
            Outcome::Dump => retry(policy, "sell", || ledger.sell()).await,
        };
        traded.map_err(|err| err.into_inner())
    }
}

/// Runs after the round is closed. Its result never touches event state; it
/// reports, releases the transaction flight, then re-evaluates a round that
/// crossed a threshold while this trade was running.
async fn run_terminal_action<L: LedgerClient, N: Notifier>(
    context: TerminalContext<L, N>,
    outcome: Outcome,
    flight: FlightGuard,
) -> TerminalReport {
    context
        .announce(messages::round_completed(&context.config, outcome))
        .await;

    let report = if !context.config.transactions_enabled {
        info!(%outcome, "transactions disabled, skipping trade");
        context
            .announce(messages::trades_disabled(&context.config, outcome))
            .await;
        TerminalReport::Disabled
    } else {
        match context.trade(outcome).await {
            Ok(receipt) => {
                info!(%outcome, reference = %receipt.reference, "trade executed");
                context.announce(messages::trade_executed(&receipt)).await;
                TerminalReport::Executed(receipt)
            }
            Err(err) => {
                error!(%outcome, %err, "trade failed");
                context
                    .announce(messages::trade_failed(&context.config, outcome))
                    .await;
                TerminalReport::Failed(err)
            }
        }
    };
    drop(flight);
    if let Some(engine) = context.engine.upgrade() {
        recheck_completion(engine).await;
    }
    report
}

/// Boxed so the terminal action and `check_completion` do not name each
/// other's future types.
fn recheck_completion<L: LedgerClient, N: Notifier>(
    engine: Arc<EventEngine<L, N>>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let CompletionCheck::Completed(completion) = engine.check_completion().await {
            info!(
                outcome = %completion.outcome,
                final_score = completion.final_score,
                "deferred round completed"
            );
        }
    })
}
