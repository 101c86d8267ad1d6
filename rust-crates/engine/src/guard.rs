//! Single-process advisory synchronization around the shared round.
//!
//! One global event lock with bounded polling acquisition, a per-user lock
//! set nested inside it, and two single-flight flags whose release is tied to
//! a guard value so every exit path clears them.

use crate::model::{
    EventState,
    UserId,
};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_POLL_ATTEMPTS: u32 = 10;

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lock stayed busy for the whole polling budget")]
pub struct Busy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

pub type EventGuard<'a> = sync::MutexGuard<'a, EventState>;

pub struct ConcurrencyGuard {
    event: sync::Mutex<EventState>,
    users: UserLocks,
    message_update: SingleFlight,
    transaction: SingleFlight,
    policy: LockPolicy,
}

impl ConcurrencyGuard {
    pub fn new(state: EventState, policy: LockPolicy) -> Self {
        Self {
            event: sync::Mutex::new(state),
            users: UserLocks::default(),
            message_update: SingleFlight::default(),
            transaction: SingleFlight::default(),
            policy,
        }
    }

    /// Polls for the event lock, giving up with [`Busy`] once the attempt
    /// budget is spent. Nothing is mutated on failure.
    pub async fn acquire_event(&self) -> Result<EventGuard<'_>, Busy> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Ok(guard) = self.event.try_lock() {
                return Ok(guard);
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.poll_interval).await;
            }
        }
        debug!(attempts, "event lock busy");
        Err(Busy)
    }

    /// Unbounded wait, for internal bookkeeping that must not be dropped.
    pub async fn lock_event(&self) -> EventGuard<'_> {
        self.event.lock().await
    }

    pub fn lock_user(&self, user: UserId) -> Option<UserLockGuard<'_>> {
        self.users.try_lock(user)
    }

    pub fn message_update(&self) -> &SingleFlight {
        &self.message_update
    }

    pub fn transaction(&self) -> &SingleFlight {
        &self.transaction
    }
}

#[derive(Debug, Default)]
pub struct UserLocks {
    held: Mutex<HashSet<UserId>>,
}

impl UserLocks {
    pub fn try_lock(&self, user: UserId) -> Option<UserLockGuard<'_>> {
        lock(&self.held)
            .insert(user)
            .then_some(UserLockGuard { locks: self, user })
    }
}

#[must_use]
pub struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user: UserId,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        lock(&self.locks.held).remove(&self.user);
    }
}

/// At most one holder; later callers are turned away rather than queued.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[must_use]
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl FlightGuard {
    /// Keeps the flight held for `delay`, then releases it.
    pub fn release_after(self, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(self);
        });
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
