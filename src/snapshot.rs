//! Persisting a replica's logs, vector clock, and OMITTED counter across
//! restarts. The two state stores are out of scope here — they persist
//! themselves through their own adapter.

use crate::log::LogState;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything [`crate::snapshot::SnapshotStore`] saves and loads for one replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub replica_id: crate::ReplicaId,
    pub log_state: LogState,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
    async fn load(&self, replica_id: crate::ReplicaId) -> Result<Option<Snapshot>>;
}

/// Reference [`SnapshotStore`] rooted at a directory, one `bincode` file per replica.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, replica_id: crate::ReplicaId) -> PathBuf {
        self.root.join(format!("replica-{}.snapshot", replica_id.index()))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(Error::Io)?;
        let bytes = bincode::serialize(snapshot).map_err(Error::Serialization)?;
        let path = self.path_for(snapshot.replica_id);
        let tmp_path = path.with_extension("snapshot.tmp");
        tokio::fs::write(&tmp_path, &bytes).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    async fn load(&self, replica_id: crate::ReplicaId) -> Result<Option<Snapshot>> {
        let path = self.path_for(replica_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot = bincode::deserialize(&bytes).map_err(Error::Serialization)?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplicaId;

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = tempdir();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.load(ReplicaId(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir();
        let store = FileSnapshotStore::new(dir.path());
        let snapshot = Snapshot {
            replica_id: ReplicaId(2),
            log_state: LogState::new(3),
        };
        store.save(&snapshot).await.unwrap();

        let loaded = store.load(ReplicaId(2)).await.unwrap().unwrap();
        assert_eq!(loaded.replica_id, ReplicaId(2));
        assert_eq!(loaded.log_state.vector_clock, snapshot.log_state.vector_clock);
    }

    #[tokio::test]
    async fn save_overwrites_a_prior_snapshot_atomically() {
        let dir = tempdir();
        let store = FileSnapshotStore::new(dir.path());
        let mut snapshot = Snapshot {
            replica_id: ReplicaId(0),
            log_state: LogState::new(1),
        };
        store.save(&snapshot).await.unwrap();

        snapshot.log_state.vector_clock.inc(0);
        store.save(&snapshot).await.unwrap();

        let loaded = store.load(ReplicaId(0)).await.unwrap().unwrap();
        assert_eq!(loaded.log_state.vector_clock.get(0), 1);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
