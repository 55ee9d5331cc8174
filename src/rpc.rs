//! The RPC surface a replica exposes to its peers, modeled as a trait so the
//! wire format is pluggable. [`InMemoryTransport`] is a same-process,
//! `tokio::mpsc`-backed stand-in for a networked implementation, mirroring
//! the teacher crate's channel-based message bus; a TCP or gRPC transport
//! would implement the same trait.

use crate::log::{Csn, LogEntry};
use crate::vector_clock::VectorClock;
use crate::{Error, Result, ReplicaId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct PingRequest {
    pub sender_id: ReplicaId,
}

#[derive(Debug, Clone)]
pub struct PingReply {
    pub alive: bool,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub query: String,
    pub from_commit: bool,
}

#[derive(Debug, Clone)]
pub struct ReadReply {
    pub rows: Vec<crate::store::Row>,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub client_nonce: uuid::Uuid,
    pub write: String,
    pub undo: String,
    pub check: String,
    pub merge: String,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteReply {
    pub has_conflict: bool,
    pub was_resolved: bool,
}

#[derive(Debug, Clone)]
pub struct AeProbeRequest {
    pub sender_id: ReplicaId,
}

#[derive(Debug, Clone)]
pub struct AeProbeReply {
    pub version_vector: VectorClock,
    pub committed_high_csn: Csn,
}

#[derive(Debug, Clone)]
pub struct AeDeliverRequest {
    pub committed: Vec<LogEntry>,
    pub tentative: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct AeDeliverReply {
    pub ok: bool,
}

/// The five RPCs a replica serves, as an async trait callable against a
/// `replica_id` resolved through whatever routing the implementation uses.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn ping(&self, to: ReplicaId, req: PingRequest) -> Result<PingReply>;
    async fn read(&self, to: ReplicaId, req: ReadRequest) -> Result<ReadReply>;
    async fn write(&self, to: ReplicaId, req: WriteRequest) -> Result<WriteReply>;
    async fn ae_probe(&self, to: ReplicaId, req: AeProbeRequest) -> Result<AeProbeReply>;
    async fn ae_deliver(&self, to: ReplicaId, req: AeDeliverRequest) -> Result<AeDeliverReply>;
}

/// One inbound call, boxed up with a reply channel, handed to whatever task
/// owns the receiving replica's mutex.
pub enum Inbound {
    Ping(PingRequest, oneshot::Sender<PingReply>),
    Read(ReadRequest, oneshot::Sender<Result<ReadReply>>),
    Write(WriteRequest, oneshot::Sender<Result<WriteReply>>),
    AeProbe(AeProbeRequest, oneshot::Sender<AeProbeReply>),
    AeDeliver(AeDeliverRequest, oneshot::Sender<Result<AeDeliverReply>>),
}

/// In-process transport: every registered replica gets an `mpsc` channel of
/// [`Inbound`] calls; `send`ing a request to a replica id that isn't
/// registered, or whose channel has been dropped (the replica was killed),
/// fails with [`Error::PeerUnreachable`].
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    endpoints: DashMap<ReplicaId, mpsc::Sender<Inbound>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica's inbox, returning the receiver the replica's
    /// dispatch loop should poll.
    pub fn register(&self, id: ReplicaId, capacity: usize) -> mpsc::Receiver<Inbound> {
        let (tx, rx) = mpsc::channel(capacity);
        self.endpoints.insert(id, tx);
        rx
    }

    pub fn unregister(&self, id: ReplicaId) {
        self.endpoints.remove(&id);
    }

    fn endpoint(&self, id: ReplicaId) -> Result<mpsc::Sender<Inbound>> {
        self.endpoints
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::PeerUnreachable(id))
    }
}

#[async_trait]
impl RpcTransport for InMemoryTransport {
    async fn ping(&self, to: ReplicaId, req: PingRequest) -> Result<PingReply> {
        let endpoint = self.endpoint(to)?;
        let (tx, rx) = oneshot::channel();
        endpoint
            .send(Inbound::Ping(req, tx))
            .await
            .map_err(|_| Error::PeerUnreachable(to))?;
        rx.await.map_err(|_| Error::PeerUnreachable(to))
    }

    async fn read(&self, to: ReplicaId, req: ReadRequest) -> Result<ReadReply> {
        let endpoint = self.endpoint(to)?;
        let (tx, rx) = oneshot::channel();
        endpoint
            .send(Inbound::Read(req, tx))
            .await
            .map_err(|_| Error::PeerUnreachable(to))?;
        rx.await.map_err(|_| Error::PeerUnreachable(to))?
    }

    async fn write(&self, to: ReplicaId, req: WriteRequest) -> Result<WriteReply> {
        let endpoint = self.endpoint(to)?;
        let (tx, rx) = oneshot::channel();
        endpoint
            .send(Inbound::Write(req, tx))
            .await
            .map_err(|_| Error::PeerUnreachable(to))?;
        rx.await.map_err(|_| Error::PeerUnreachable(to))?
    }

    async fn ae_probe(&self, to: ReplicaId, req: AeProbeRequest) -> Result<AeProbeReply> {
        let endpoint = self.endpoint(to)?;
        let (tx, rx) = oneshot::channel();
        endpoint
            .send(Inbound::AeProbe(req, tx))
            .await
            .map_err(|_| Error::PeerUnreachable(to))?;
        rx.await.map_err(|_| Error::PeerUnreachable(to))
    }

    async fn ae_deliver(&self, to: ReplicaId, req: AeDeliverRequest) -> Result<AeDeliverReply> {
        let endpoint = self.endpoint(to)?;
        let (tx, rx) = oneshot::channel();
        endpoint
            .send(Inbound::AeDeliver(req, tx))
            .await
            .map_err(|_| Error::PeerUnreachable(to))?;
        rx.await.map_err(|_| Error::PeerUnreachable(to))?
    }
}

pub type SharedTransport = Arc<InMemoryTransport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_to_unregistered_replica_is_peer_unreachable() {
        let transport = InMemoryTransport::new();
        let err = transport
            .ping(ReplicaId(9), PingRequest { sender_id: ReplicaId(0) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn ping_round_trips_through_a_registered_endpoint() {
        let transport = InMemoryTransport::new();
        let mut rx = transport.register(ReplicaId(1), 8);

        let responder = tokio::spawn(async move {
            if let Some(Inbound::Ping(_req, reply)) = rx.recv().await {
                let _ = reply.send(PingReply { alive: true });
            }
        });

        let reply = transport
            .ping(ReplicaId(1), PingRequest { sender_id: ReplicaId(0) })
            .await
            .unwrap();
        assert!(reply.alive);
        responder.await.unwrap();
    }
}
