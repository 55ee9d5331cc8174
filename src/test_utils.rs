//! Helpers for wiring a handful of [`crate::replica::Replica`]s together
//! in-process for scenario tests and benchmarks — no real network, no real
//! disk beyond a throwaway temp directory.

use crate::config::Config;
use crate::replica::Replica;
use crate::rpc::{InMemoryTransport, RpcTransport};
use crate::snapshot::FileSnapshotStore;
use crate::store::InMemoryStateStore;
use crate::ReplicaId;
use std::sync::Arc;
use std::time::Duration;

/// A small in-process cluster: `n` replicas, replica 0 is primary, all
/// wired to the same [`InMemoryTransport`] with dispatch loops already
/// spawned. Dropping this stops nothing by itself — call [`Cluster::kill_all`]
/// or let the spawned tasks outlive the test (they're cheap and idle).
pub struct Cluster {
    pub replicas: Vec<Arc<Replica>>,
    pub transport: Arc<InMemoryTransport>,
    _tempdir: tempfile::TempDir,
}

impl Cluster {
    /// Builds an `n`-replica cluster backed by fresh [`InMemoryStateStore`]s
    /// and a temp-directory [`FileSnapshotStore`] per replica, with replica
    /// 0 as primary and a short anti-entropy interval suited to tests.
    pub async fn new(n: u32) -> Self {
        Self::with_primary(n, 0).await
    }

    pub async fn with_primary(n: u32, primary_id: u32) -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let peer_addresses: Vec<String> = (0..n).map(|i| format!("inproc://{i}")).collect();

        let mut replicas = Vec::with_capacity(n as usize);
        for replica_id in 0..n {
            let config = Config {
                replica_id,
                n,
                peer_addresses: peer_addresses.clone(),
                primary_id,
                anti_entropy_interval: Duration::from_millis(5)..Duration::from_millis(15),
                rpc_timeout: Duration::from_secs(1),
                persist_path: dir.path().join(format!("replica-{replica_id}")),
            };

            let replica = Replica::new(
                config,
                Arc::new(InMemoryStateStore::new()),
                Arc::new(InMemoryStateStore::new()),
                transport.clone() as Arc<dyn RpcTransport>,
                Arc::new(FileSnapshotStore::new(dir.path())),
            )
            .await
            .expect("replica construction");

            let rx = transport.register(ReplicaId::new(replica_id), 64);
            tokio::spawn(replica.clone().run_dispatch_loop(rx));

            replicas.push(replica);
        }

        Self {
            replicas,
            transport,
            _tempdir: dir,
        }
    }

    /// Starts every replica's anti-entropy timer task. Separate from
    /// construction so deterministic tests can drive rounds manually via
    /// [`Replica::run_anti_entropy_round`] instead.
    pub fn spawn_anti_entropy(&self) {
        for replica in &self.replicas {
            tokio::spawn(replica.clone().run_anti_entropy_loop());
        }
    }

    pub fn replica(&self, id: u32) -> Arc<Replica> {
        self.replicas[id as usize].clone()
    }

    pub fn kill_all(&self) {
        for replica in &self.replicas {
            replica.kill();
        }
    }

    /// Runs one anti-entropy round for every replica, each against a
    /// uniformly random peer. Repeat this enough times in a test and the
    /// cluster converges without needing real wall-clock waits.
    pub async fn settle(&self, rounds: usize) {
        for _ in 0..rounds {
            for replica in &self.replicas {
                replica.run_anti_entropy_round().await;
            }
        }
    }
}

/// Order-sensitive equality: same entries, same positions, compared by id.
pub fn assert_logs_equal_ordered(a: &[crate::log::LogEntry], b: &[crate::log::LogEntry]) {
    let a_ids: Vec<_> = a.iter().map(|e| e.id).collect();
    let b_ids: Vec<_> = b.iter().map(|e| e.id).collect();
    assert_eq!(a_ids, b_ids, "logs differ in order or membership");
}

/// Multiset equality: same entries regardless of order, compared by id.
pub fn assert_logs_equal_multiset(a: &[crate::log::LogEntry], b: &[crate::log::LogEntry]) {
    let mut a_ids: Vec<_> = a.iter().map(|e| e.id).collect();
    let mut b_ids: Vec<_> = b.iter().map(|e| e.id).collect();
    a_ids.sort();
    b_ids.sort();
    assert_eq!(a_ids, b_ids, "logs differ in membership");
}
