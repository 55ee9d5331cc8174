use thiserror::Error;

/// Error taxonomy for the replica engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("vector clock rewind on slot {slot}: attempted to set {attempted}, current {current}")]
    ClockRewind {
        slot: usize,
        attempted: u64,
        current: u64,
    },

    #[error("vector clock size mismatch: self has {self_len} slots, other has {other_len}")]
    ClockSizeMismatch { self_len: usize, other_len: usize },

    #[error("replica {0:?} is not alive")]
    NotAlive(crate::ReplicaId),

    #[error("replica {0:?} is not the primary")]
    NotPrimary(crate::ReplicaId),

    #[error("peer {0:?} unreachable")]
    PeerUnreachable(crate::ReplicaId),

    #[error("anti-entropy round with {0:?} timed out")]
    AntiEntropyTimeout(crate::ReplicaId),

    #[error("state store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot not found for replica {0:?}")]
    SnapshotNotFound(crate::ReplicaId),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
