//! Pairwise anti-entropy: the initiator computes what a peer is missing
//! from its own logs, and the peer integrates whatever arrives under its
//! own write-side mutex.
//!
//! This module is transport-agnostic — it operates on [`LogState`] and the
//! two stores directly. [`crate::replica::Replica`] is what actually drives
//! a round over [`crate::rpc::RpcTransport`], calling [`AntiEntropy::advertise`]
//! to answer an `AE_Probe` and [`AntiEntropy::plan`] / [`AntiEntropy::integrate`]
//! on either side of an `AE_Deliver`.

use crate::log::{Csn, LogEntry, LogState};
use crate::rollback::RollbackEngine;
use crate::store::StateStore;
use crate::vector_clock::VectorClock;
use crate::Result;

/// What a replica tells an anti-entropy initiator about itself.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub version_vector: VectorClock,
    pub committed_high_csn: Csn,
}

pub struct AntiEntropy;

impl AntiEntropy {
    /// Answers an `AE_Probe`: this replica's version vector and commit high-water mark.
    pub fn advertise(state: &LogState) -> PeerState {
        PeerState {
            version_vector: state.vector_clock.clone(),
            committed_high_csn: state.omitted,
        }
    }

    /// Computes what `peer` is missing, from this replica's point of view
    /// acting as initiator: committed entries in CSN order first, then
    /// tentative entries in accept-stamp order.
    pub fn plan(local: &LogState, peer: &PeerState) -> (Vec<LogEntry>, Vec<LogEntry>) {
        let committed: Vec<LogEntry> = local
            .commit
            .entries_after(peer.committed_high_csn)
            .cloned()
            .collect();

        let tentative: Vec<LogEntry> = local
            .tentative
            .iter()
            .filter(|e| {
                let origin = e.accept_stamp.origin.index();
                origin >= peer.version_vector.len()
                    || e.accept_stamp.accept_time > peer.version_vector.get(origin)
            })
            .cloned()
            .collect();

        (committed, tentative)
    }

    /// Integrates a delivered batch (`AE_Deliver`) into this replica's state,
    /// running rollback/reapply if the batch changes anything.
    ///
    /// Commits are merged first, then any tentative entries not already
    /// dominated by this replica's version vector are folded into the
    /// pending set before reapplying. The version vector is advanced to
    /// reflect every entry's accept-stamp as it is absorbed.
    pub async fn integrate(
        state: &mut LogState,
        committed_store: &dyn StateStore,
        full_store: &dyn StateStore,
        committed: Vec<LogEntry>,
        tentative: Vec<LogEntry>,
    ) -> Result<()> {
        let new_committed: Vec<LogEntry> = committed
            .into_iter()
            .filter(|e| e.csn > state.omitted)
            .collect();

        let new_tentative: Vec<LogEntry> = tentative
            .into_iter()
            .filter(|e| e.accept_stamp.accept_time > state.vector_clock.get(e.accept_stamp.origin.index()))
            .filter(|e| !state.tentative.contains(e.accept_stamp))
            .collect();

        if new_committed.is_empty() && new_tentative.is_empty() {
            tracing::debug!("anti-entropy batch carried nothing new");
            return Ok(());
        }

        for entry in new_committed.iter().chain(new_tentative.iter()) {
            let slot = entry.accept_stamp.origin.index();
            let t = entry.accept_stamp.accept_time;
            if t > state.vector_clock.get(slot) {
                state.vector_clock.set(slot, t)?;
            }
        }

        let mut pending = state.tentative.as_slice().to_vec();
        pending.extend(new_tentative);

        RollbackEngine::undo_all(state, full_store).await?;
        RollbackEngine::merge_commits(state, committed_store, full_store, new_committed).await?;
        let pending: Vec<LogEntry> = pending
            .into_iter()
            .filter(|e| !state.commit.contains_accept_stamp(e.accept_stamp))
            .collect();
        RollbackEngine::reapply(state, full_store, pending).await?;

        Ok(())
    }
}
