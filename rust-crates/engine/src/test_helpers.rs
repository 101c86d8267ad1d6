//! In-process fakes for every collaborator seam.

use crate::{
    collaborators::{
        AuthorizationOracle,
        LedgerClient,
        LedgerError,
        Notifier,
        NotifyError,
        TradeReceipt,
    },
    guard::lock,
    model::{
        ChatId,
        MessageRef,
        UserId,
    },
};
use std::{
    collections::HashSet,
    sync::Mutex,
    time::Duration,
};

#[derive(Debug, Default)]
struct LedgerState {
    reserve: u64,
    demand: u64,
    reserve_failure: Option<LedgerError>,
    demand_failure: Option<LedgerError>,
    trade_failure: Option<LedgerError>,
    balance_delay: Duration,
    trade_delay: Duration,
    balance_reads: usize,
    buys: usize,
    sells: usize,
}

#[derive(Debug, Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn with_balances(reserve: u64, demand: u64) -> Self {
        let ledger = Self::default();
        ledger.set_balances(reserve, demand);
        ledger
    }

    pub fn set_balances(&self, reserve: u64, demand: u64) {
        let mut state = lock(&self.state);
        state.reserve = reserve;
        state.demand = demand;
    }

    pub fn fail_reserve(&self, failure: Option<LedgerError>) {
        lock(&self.state).reserve_failure = failure;
    }

    pub fn fail_demand(&self, failure: Option<LedgerError>) {
        lock(&self.state).demand_failure = failure;
    }

    pub fn fail_trades(&self, failure: Option<LedgerError>) {
        lock(&self.state).trade_failure = failure;
    }

    pub fn set_balance_delay(&self, delay: Duration) {
        lock(&self.state).balance_delay = delay;
    }

    pub fn set_trade_delay(&self, delay: Duration) {
        lock(&self.state).trade_delay = delay;
    }

    pub fn balance_reads(&self) -> usize {
        lock(&self.state).balance_reads
    }

    pub fn buys(&self) -> usize {
        lock(&self.state).buys
    }

    pub fn sells(&self) -> usize {
        lock(&self.state).sells
    }

    async fn balance(&self, reserve: bool) -> Result<u64, LedgerError> {
        let delay = lock(&self.state).balance_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        state.balance_reads += 1;
        let (failure, amount) = if reserve {
            (&state.reserve_failure, state.reserve)
        } else {
            (&state.demand_failure, state.demand)
        };
        match failure {
            Some(err) => Err(err.clone()),
            None => Ok(amount),
        }
    }

    async fn trade(&self, buy: bool) -> Result<TradeReceipt, LedgerError> {
        let delay = lock(&self.state).trade_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if buy {
            state.buys += 1;
        } else {
            state.sells += 1;
        }
        if let Some(err) = &state.trade_failure {
            return Err(err.clone());
        }
        let side = if buy { "buy" } else { "sell" };
        Ok(TradeReceipt {
            reference: format!("{side}-{}", state.buys + state.sells),
            summary: format!("fake {side}"),
        })
    }
}

impl LedgerClient for FakeLedger {
    async fn reserve_balance(&self) -> Result<u64, LedgerError> {
        self.balance(true).await
    }

    async fn demand_balance(&self) -> Result<u64, LedgerError> {
        self.balance(false).await
    }

    async fn buy(&self) -> Result<TradeReceipt, LedgerError> {
        self.trade(true).await
    }

    async fn sell(&self) -> Result<TradeReceipt, LedgerError> {
        self.trade(false).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub chat: ChatId,
    pub existing: Option<MessageRef>,
    pub text: String,
}

#[derive(Debug, Default)]
struct NotifierState {
    next_message: i64,
    posts: Vec<RecordedPost>,
    sent: Vec<(ChatId, String)>,
    post_failure: Option<NotifyError>,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

impl RecordingNotifier {
    pub fn fail_posts(&self, failure: Option<NotifyError>) {
        lock(&self.state).post_failure = failure;
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        lock(&self.state).posts.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.state)
            .sent
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    async fn post_or_update(
        &self,
        chat: ChatId,
        existing: Option<MessageRef>,
        text: &str,
    ) -> Result<MessageRef, NotifyError> {
        let mut state = lock(&self.state);
        state.posts.push(RecordedPost {
            chat,
            existing,
            text: text.to_string(),
        });
        if let Some(err) = &state.post_failure {
            return Err(err.clone());
        }
        match existing {
            Some(message) => Ok(message),
            None => {
                state.next_message += 1;
                Ok(MessageRef(state.next_message))
            }
        }
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), NotifyError> {
        lock(&self.state).sent.push((chat, text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeAuthorization {
    admins: HashSet<UserId>,
}

impl FakeAuthorization {
    pub fn with_admins(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl AuthorizationOracle for FakeAuthorization {
    async fn is_privileged(&self, _chat: ChatId, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}
