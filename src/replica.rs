//! The per-process orchestrator: owns the single write-side mutex, serves
//! the RPC surface, drives anti-entropy on a timer, and persists state on
//! every mutation.

use crate::conflict::ConflictEngine;
use crate::config::Config;
use crate::log::LogState;
use crate::primary::PrimaryCommit;
use crate::rpc::{
    AeDeliverReply, AeDeliverRequest, AeProbeReply, AeProbeRequest, Inbound, PingReply,
    PingRequest, ReadReply, ReadRequest, RpcTransport, WriteReply, WriteRequest,
};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::store::StateStore;
use crate::sync::AntiEntropy;
use crate::{Error, Result, ReplicaId};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A live replica. Cheap to clone (everything of substance is behind `Arc`),
/// so a handle can be held by both the dispatch loop and the anti-entropy
/// timer task.
pub struct Replica {
    id: ReplicaId,
    config: Config,
    state: Mutex<LogState>,
    committed_store: Arc<dyn StateStore>,
    full_store: Arc<dyn StateStore>,
    transport: Arc<dyn RpcTransport>,
    snapshots: Arc<dyn SnapshotStore>,
    killed: AtomicBool,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("killed", &self.killed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Replica {
    /// Restores state from `snapshots` if present, otherwise starts fresh.
    pub async fn new(
        config: Config,
        committed_store: Arc<dyn StateStore>,
        full_store: Arc<dyn StateStore>,
        transport: Arc<dyn RpcTransport>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let id = ReplicaId::new(config.replica_id);

        let state = match snapshots.load(id).await? {
            Some(snapshot) => snapshot.log_state,
            None => LogState::new(config.n as usize),
        };

        Ok(Arc::new(Self {
            id,
            config,
            state: Mutex::new(state),
            committed_store,
            full_store,
            transport,
            snapshots,
            killed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn is_primary(&self) -> bool {
        self.config.is_primary()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Cooperative shutdown: refuses all future RPCs; in-flight mutations
    /// that already hold the mutex are allowed to finish.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    async fn persist(&self, state: &LogState) -> Result<()> {
        self.snapshots
            .save(&Snapshot {
                replica_id: self.id,
                log_state: state.clone(),
            })
            .await
    }

    // ---- RPC handlers -------------------------------------------------

    pub async fn handle_ping(&self) -> PingReply {
        PingReply {
            alive: !self.is_killed(),
        }
    }

    pub async fn handle_read(&self, req: ReadRequest) -> Result<ReadReply> {
        if self.is_killed() {
            return Err(Error::NotAlive(self.id));
        }
        let store: &dyn StateStore = if req.from_commit {
            self.committed_store.as_ref()
        } else {
            self.full_store.as_ref()
        };
        let rows = store.read(&req.query).await?;
        Ok(ReadReply { rows })
    }

    pub async fn handle_write(&self, req: WriteRequest) -> Result<WriteReply> {
        if self.is_killed() {
            return Err(Error::NotAlive(self.id));
        }
        let mut state = self.state.lock().await;
        let outcome = ConflictEngine::accept(
            &mut state,
            self.id,
            self.full_store.as_ref(),
            req.write,
            req.undo,
            req.check,
            req.merge,
        )
        .await?;

        if self.is_primary() {
            let committed = PrimaryCommit::commit_pending(&mut state, self.id, true)?;
            for entry in &committed {
                self.committed_store.execute(&entry.write_op).await?;
            }
        }

        self.persist(&state).await?;
        Ok(WriteReply {
            has_conflict: outcome.has_conflict,
            was_resolved: outcome.was_resolved,
        })
    }

    pub async fn handle_ae_probe(&self) -> AeProbeReply {
        let state = self.state.lock().await;
        let peer = AntiEntropy::advertise(&state);
        AeProbeReply {
            version_vector: peer.version_vector,
            committed_high_csn: peer.committed_high_csn,
        }
    }

    pub async fn handle_ae_deliver(&self, req: AeDeliverRequest) -> Result<AeDeliverReply> {
        if self.is_killed() {
            return Err(Error::NotAlive(self.id));
        }
        let mut state = self.state.lock().await;
        AntiEntropy::integrate(
            &mut state,
            self.committed_store.as_ref(),
            self.full_store.as_ref(),
            req.committed,
            req.tentative,
        )
        .await?;

        if self.is_primary() {
            let committed = PrimaryCommit::commit_pending(&mut state, self.id, true)?;
            for entry in &committed {
                self.committed_store.execute(&entry.write_op).await?;
            }
        }

        self.persist(&state).await?;
        Ok(AeDeliverReply { ok: true })
    }

    // ---- dispatch loop --------------------------------------------------

    /// Drains inbound RPCs delivered through `rx` until the replica is
    /// killed and the channel is drained. Intended to run as its own task.
    pub async fn run_dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            if self.is_killed() {
                continue;
            }
            match inbound {
                Inbound::Ping(_req, reply) => {
                    let _ = reply.send(self.handle_ping().await);
                }
                Inbound::Read(req, reply) => {
                    let _ = reply.send(self.handle_read(req).await);
                }
                Inbound::Write(req, reply) => {
                    let _ = reply.send(self.handle_write(req).await);
                }
                Inbound::AeProbe(_req, reply) => {
                    let _ = reply.send(self.handle_ae_probe().await);
                }
                Inbound::AeDeliver(req, reply) => {
                    let _ = reply.send(self.handle_ae_deliver(req).await);
                }
            }
        }
        tracing::debug!(replica = %self.id, "dispatch loop exiting");
    }

    // ---- anti-entropy initiator ----------------------------------------

    /// Picks one other live peer uniformly at random and runs one round as
    /// initiator. A timeout or unreachable peer is swallowed — anti-entropy
    /// simply retries on the next tick.
    pub async fn run_anti_entropy_round(&self) {
        if self.is_killed() {
            return;
        }
        let n = self.config.n;
        let others: Vec<ReplicaId> = (0..n).map(ReplicaId::new).filter(|id| *id != self.id).collect();
        let Some(&peer) = others.choose(&mut rand::thread_rng()) else {
            return;
        };

        let round = async {
            let probe = self
                .transport
                .ae_probe(peer, AeProbeRequest { sender_id: self.id })
                .await?;
            let peer_state = crate::sync::PeerState {
                version_vector: probe.version_vector,
                committed_high_csn: probe.committed_high_csn,
            };

            let (committed, tentative) = {
                let state = self.state.lock().await;
                AntiEntropy::plan(&state, &peer_state)
            };

            if committed.is_empty() && tentative.is_empty() {
                return Ok::<(), Error>(());
            }

            self.transport
                .ae_deliver(peer, AeDeliverRequest { committed, tentative })
                .await?;
            Ok(())
        };

        match tokio::time::timeout(self.config.rpc_timeout, round).await {
            Ok(Ok(())) => {
                tracing::debug!(replica = %self.id, peer = %peer, "anti-entropy round complete");
            }
            Ok(Err(e)) => {
                tracing::warn!(replica = %self.id, peer = %peer, error = %e, "anti-entropy round failed");
            }
            Err(_) => {
                tracing::warn!(replica = %self.id, peer = %peer, "anti-entropy round timed out");
            }
        }
    }

    /// Runs [`Self::run_anti_entropy_round`] on a randomized timer until
    /// killed. Intended to run as its own task.
    pub async fn run_anti_entropy_loop(self: Arc<Self>) {
        use rand::Rng;
        let (min, max) = (
            self.config.anti_entropy_interval.start,
            self.config.anti_entropy_interval.end,
        );
        while !self.is_killed() {
            let jitter = if max > min {
                rand::thread_rng().gen_range(min..max)
            } else {
                min
            };
            tokio::time::sleep(jitter).await;
            if self.is_killed() {
                break;
            }
            self.run_anti_entropy_round().await;
        }
        tracing::debug!(replica = %self.id, "anti-entropy loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::InMemoryTransport;
    use crate::snapshot::FileSnapshotStore;
    use crate::store::{InMemoryStateStore, FALSE_SENTINEL, TRUE_SENTINEL};

    fn config(replica_id: u32, n: u32, primary_id: u32, persist_path: std::path::PathBuf) -> Config {
        Config {
            replica_id,
            n,
            peer_addresses: (0..n).map(|i| format!("inproc://{i}")).collect(),
            primary_id,
            anti_entropy_interval: Duration::from_millis(5)..Duration::from_millis(10),
            rpc_timeout: Duration::from_secs(1),
            persist_path,
        }
    }

    #[tokio::test]
    async fn killed_replica_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn RpcTransport> = Arc::new(InMemoryTransport::new());
        let replica = Replica::new(
            config(0, 1, 0, dir.path().to_path_buf()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryStateStore::new()),
            transport,
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .await
        .unwrap();

        replica.kill();
        let err = replica
            .handle_write(WriteRequest {
                client_nonce: uuid::Uuid::new_v4(),
                write: "INSERT|rooms|n=0".into(),
                undo: "DELETE|rooms|n=0".into(),
                check: TRUE_SENTINEL.into(),
                merge: FALSE_SENTINEL.into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAlive(_)));
    }

    #[tokio::test]
    async fn primary_write_commits_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn RpcTransport> = Arc::new(InMemoryTransport::new());
        let committed = Arc::new(InMemoryStateStore::new());
        let replica = Replica::new(
            config(0, 1, 0, dir.path().to_path_buf()),
            committed.clone(),
            Arc::new(InMemoryStateStore::new()),
            transport,
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .await
        .unwrap();

        let reply = replica
            .handle_write(WriteRequest {
                client_nonce: uuid::Uuid::new_v4(),
                write: "INSERT|rooms|n=0".into(),
                undo: "DELETE|rooms|n=0".into(),
                check: TRUE_SENTINEL.into(),
                merge: FALSE_SENTINEL.into(),
            })
            .await
            .unwrap();
        assert!(!reply.has_conflict);
        assert!(committed.check("EXISTS|rooms|n=0").await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_round_trips_across_replica_restart() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn RpcTransport> = Arc::new(InMemoryTransport::new());
        let replica = Replica::new(
            config(0, 1, 0, dir.path().to_path_buf()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryStateStore::new()),
            transport.clone(),
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .await
        .unwrap();

        replica
            .handle_write(WriteRequest {
                client_nonce: uuid::Uuid::new_v4(),
                write: "INSERT|rooms|n=0".into(),
                undo: "DELETE|rooms|n=0".into(),
                check: TRUE_SENTINEL.into(),
                merge: FALSE_SENTINEL.into(),
            })
            .await
            .unwrap();

        let resumed = Replica::new(
            config(0, 1, 0, dir.path().to_path_buf()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryStateStore::new()),
            transport,
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .await
        .unwrap();

        let probe = resumed.handle_ae_probe().await;
        assert_eq!(probe.committed_high_csn, 1);
    }
}
