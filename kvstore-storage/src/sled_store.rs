use std::path::Path;

use tracing::warn;

use crate::PersistentStore;

/// `sled`-backed persistent store, selected with `node server --store
/// <path>`. An alternative to [`crate::InMemoryStore`] for a node that
/// should keep its data across restarts.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> sled::Result<Self> {
        Ok(Self { db: sled::open(path)? })
    }
}

impl PersistentStore for SledStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.db.get(key) {
            Ok(value) => value.map(|ivec| ivec.to_vec()),
            Err(e) => {
                warn!(error = %e, key, "sled get failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        if let Err(e) = self.db.insert(key, value) {
            warn!(error = %e, key, "sled set failed");
            return;
        }
        if let Err(e) = self.db.flush() {
            warn!(error = %e, key, "sled flush failed");
        }
    }
}
