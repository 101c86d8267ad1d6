// Sled-backed persistence for the game state snapshot.
use anyhow::Context;
use momentum_engine::{
    collaborators::StateStorage,
    model::StateSnapshot,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

const LATEST_KEY: &[u8] = b"latest";

#[derive(Clone)]
pub struct SledStateStorage {
    tree: Tree,
}

impl SledStateStorage {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db
            .open_tree("event_state")
            .context("open event_state tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(&db)
    }
}

impl StateStorage for SledStateStorage {
    fn load(&self) -> anyhow::Result<Option<StateSnapshot>> {
        let Some(bytes) = self.tree.get(LATEST_KEY).context("read saved state")? else {
            return Ok(None);
        };
        let snapshot: StateSnapshot =
            serde_json::from_slice(&bytes).context("decode saved state")?;
        Ok(Some(StateSnapshot {
            inventory: snapshot.inventory.normalized(),
            ..snapshot
        }))
    }

    fn save(&mut self, snapshot: &StateSnapshot) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(snapshot).context("encode state")?;
        self.tree
            .insert(LATEST_KEY, bytes)
            .context("write state")?;
        self.tree.flush().context("flush state")?;
        Ok(())
    }
}
