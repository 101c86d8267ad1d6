//! Best-effort mirror of the shared state.
//!
//! Callers never wait for durability. Each snapshot carries the whole state,
//! so the queue holds only the newest one: a snapshot superseded before the
//! writer got to it is dropped without losing anything.

use crate::{
    collaborators::StateStorage,
    guard::lock,
    model::StateSnapshot,
};
use std::sync::{
    Arc,
    Mutex,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};
use tracing::{
    error,
    info,
};

const LOG_EVERY: u64 = 10;

#[derive(Debug, Default)]
pub struct PersistenceHandle {
    sender: Option<watch::Sender<Option<StateSnapshot>>>,
}

impl PersistenceHandle {
    /// A handle that discards everything, for engines without storage.
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn submit(&self, snapshot: StateSnapshot) {
        if let Some(sender) = &self.sender {
            sender.send_replace(Some(snapshot));
        }
    }
}

/// Starts the single writer task. Dropping the returned handle flushes the
/// last submitted snapshot, after which the task ends and yields the storage.
pub fn spawn_writer<S: StateStorage>(mut storage: S) -> (PersistenceHandle, JoinHandle<S>) {
    let (sender, mut receiver) = watch::channel(None::<StateSnapshot>);
    let task = tokio::spawn(async move {
        let mut saves = 0u64;
        while receiver.changed().await.is_ok() {
            let Some(snapshot) = receiver.borrow_and_update().clone() else {
                continue;
            };
            match storage.save(&snapshot) {
                Ok(()) => {
                    saves += 1;
                    if saves % LOG_EVERY == 0 {
                        info!(saves, "state saved");
                    }
                }
                Err(err) => error!(?err, "failed to save state"),
            }
        }
        storage
    });
    (
        PersistenceHandle {
            sender: Some(sender),
        },
        task,
    )
}

#[derive(Clone, Default)]
pub struct InMemoryStateStorage {
    snapshot: Arc<Mutex<Option<StateSnapshot>>>,
    saves: Arc<Mutex<u64>>,
}

impl InMemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(Some(snapshot))),
            saves: Arc::new(Mutex::new(0)),
        }
    }

    pub fn snapshot(&self) -> Option<StateSnapshot> {
        lock(&self.snapshot).clone()
    }

    pub fn saves(&self) -> u64 {
        *lock(&self.saves)
    }
}

impl StateStorage for InMemoryStateStorage {
    fn load(&self) -> anyhow::Result<Option<StateSnapshot>> {
        Ok(lock(&self.snapshot)
            .as_ref()
            .map(|snapshot| StateSnapshot {
                inventory: snapshot.inventory.normalized(),
                ..snapshot.clone()
            }))
    }

    fn save(&mut self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        *lock(&self.snapshot) = Some(snapshot.clone());
        *lock(&self.saves) += 1;
        Ok(())
    }
}
