use crate::{
    collaborators::LedgerClient,
    guard::lock,
    retry::{
        RetryPolicy,
        retry,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{
    info,
    warn,
};

pub const MIN_THRESHOLD: i64 = 10;
pub const MAX_THRESHOLD: i64 = 250;
pub const RATIO_CAP: f64 = 100.0;
pub const CACHE_TTL: Duration = Duration::from_secs(30);

const NANO: f64 = 1e9;

/// Completion bounds of one round. `dump` is a magnitude: the round closes
/// when the score reaches `-dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub pump: i64,
    pub dump: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balances {
    pub reserve: u64,
    pub demand: u64,
}

impl Balances {
    pub fn reserve_units(&self) -> f64 {
        self.reserve as f64 / NANO
    }

    pub fn demand_units(&self) -> f64 {
        self.demand as f64 / NANO
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSnapshot {
    pub thresholds: Thresholds,
    pub balances: Balances,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    pub min: i64,
    pub max: i64,
    pub ratio_cap: f64,
    pub cache_ttl: Duration,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            min: MIN_THRESHOLD,
            max: MAX_THRESHOLD,
            ratio_cap: RATIO_CAP,
            cache_ttl: CACHE_TTL,
        }
    }
}

impl ThresholdPolicy {
    pub fn midpoint(&self) -> Thresholds {
        let mid = ((self.min + self.max) as f64 / 2.0).round() as i64;
        Thresholds {
            pump: mid,
            dump: mid,
        }
    }

    /// Maps the demand/reserve ratio onto `[min, max]`: little demand token
    /// means a far pump bound and a near dump bound, and the reverse.
    pub fn derive(&self, balances: Balances) -> Thresholds {
        let reserve = balances.reserve_units();
        let demand = balances.demand_units();
        if reserve == 0.0 && demand == 0.0 {
            return self.midpoint();
        }
        if demand == 0.0 {
            return Thresholds {
                pump: self.max,
                dump: self.min,
            };
        }
        if reserve == 0.0 {
            return Thresholds {
                pump: self.min,
                dump: self.max,
            };
        }

        let normalized = (demand / reserve).min(self.ratio_cap) / self.ratio_cap;
        if !normalized.is_finite() {
            return self.midpoint();
        }
        let span = (self.max - self.min) as f64;
        let pump = (self.min as f64 + span * (1.0 - normalized)).round() as i64;
        let dump = (self.min as f64 + span * normalized).round() as i64;
        Thresholds {
            pump: pump.clamp(self.min, self.max),
            dump: dump.clamp(self.min, self.max),
        }
    }
}

pub struct ThresholdCalculator<L> {
    ledger: Arc<L>,
    policy: ThresholdPolicy,
    retry: RetryPolicy,
    cache: Mutex<Option<(Instant, ThresholdSnapshot)>>,
}

impl<L> ThresholdCalculator<L> {
    pub fn new(ledger: Arc<L>, policy: ThresholdPolicy, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            retry,
            cache: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<ThresholdSnapshot> {
        let guard = lock(&self.cache);
        guard
            .as_ref()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.policy.cache_ttl)
            .map(|(_, snapshot)| snapshot.clone())
    }
}

impl<L: LedgerClient> ThresholdCalculator<L> {
    /// Never fails: unreachable balances count as zero and degenerate input
    /// yields the midpoint.
    pub async fn compute(&self, use_cache: bool) -> ThresholdSnapshot {
        if use_cache && let Some(snapshot) = self.cached() {
            return snapshot;
        }

        let ledger = self.ledger.as_ref();
        let (reserve, demand) = tokio::join!(
            retry(&self.retry, "reserve balance", move || ledger
                .reserve_balance()),
            retry(&self.retry, "demand balance", move || ledger
                .demand_balance()),
        );
        let complete = reserve.is_ok() && demand.is_ok();
        let reserve = reserve.unwrap_or_else(|err| {
            warn!(%err, "reserve balance unavailable, using zero");
            0
        });
        let demand = demand.unwrap_or_else(|err| {
            warn!(%err, "demand balance unavailable, using zero");
            0
        });

        let balances = Balances { reserve, demand };
        let thresholds = self.policy.derive(balances);
        info!(
            reserve = balances.reserve_units(),
            demand = balances.demand_units(),
            pump = thresholds.pump,
            dump = thresholds.dump,
            "computed thresholds"
        );
        let snapshot = ThresholdSnapshot {
            thresholds,
            balances,
            computed_at: Utc::now(),
        };
        if complete {
            *lock(&self.cache) = Some((Instant::now(), snapshot.clone()));
        }
        snapshot
    }
}
