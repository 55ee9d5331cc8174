//! Undoing tentative writes, merging in fresh commits, and replaying what
//! remains.
//!
//! A replica never rewrites history in place: when a commit arrives out of
//! tentative order, or several do at once, the full store is walked back to
//! the committed store's state and the surviving tentative writes are
//! replayed on top, in the same accept-stamp order they'd have been applied
//! in to begin with. This is the only place besides
//! [`crate::conflict::ConflictEngine::accept`] that touches the full store.

use crate::conflict::ConflictEngine;
use crate::log::{Csn, LogEntry, LogState};
use crate::store::StateStore;
use crate::Result;

pub struct RollbackEngine;

impl RollbackEngine {
    /// Restores `full_store` to the committed state by applying the undo log
    /// in reverse order, then empties the undo and tentative logs.
    ///
    /// Leaves `state.tentative` empty — the caller is expected to follow
    /// with [`Self::reapply`] once the new commits have been merged in.
    pub async fn undo_all(state: &mut LogState, full_store: &dyn StateStore) -> Result<()> {
        for undo in state.undo.as_slice().iter().rev() {
            ConflictEngine::apply(undo, full_store).await?;
        }
        state.undo.take_entries();
        state.tentative.take_entries();
        Ok(())
    }

    /// Merges a batch of freshly-learned commits: for each, applies
    /// `write_op` to both the committed and full stores, then appends it to
    /// the commit log. Entries at or below the current high-water mark are
    /// skipped as already-known.
    ///
    /// `commits` need not be pre-sorted. Call this after [`Self::undo_all`]
    /// so the full store is sitting at the prior committed state when these
    /// writes land on it.
    pub async fn merge_commits(
        state: &mut LogState,
        committed_store: &dyn StateStore,
        full_store: &dyn StateStore,
        mut commits: Vec<LogEntry>,
    ) -> Result<()> {
        commits.sort_by_key(|e| e.csn);
        for entry in commits {
            if entry.csn <= state.omitted {
                continue;
            }
            committed_store.execute(&entry.write_op).await?;
            full_store.execute(&entry.write_op).await?;
            state.omitted = entry.csn;
            state.commit.push_back(entry);
        }
        Ok(())
    }

    /// Re-applies every surviving tentative write against `full_store`, in
    /// ascending accept-stamp order, rebuilding the tentative and undo logs
    /// from scratch as it goes.
    ///
    /// `pending` is the set of writes that were tentative before the undo —
    /// entries whose accept-stamp now matches a commit in `state.commit` are
    /// dropped rather than replayed, since the commit already reflects them.
    pub async fn reapply(
        state: &mut LogState,
        full_store: &dyn StateStore,
        mut pending: Vec<LogEntry>,
    ) -> Result<()> {
        pending.sort_by_key(|e| e.accept_stamp);

        let mut tentative = Vec::with_capacity(pending.len());
        let mut undo = Vec::with_capacity(pending.len());

        for entry in pending {
            if state.commit.contains_accept_stamp(entry.accept_stamp) {
                continue;
            }
            let outcome = ConflictEngine::apply(&entry, full_store).await?;
            if !outcome.was_resolved {
                tracing::warn!(accept_stamp = %entry.accept_stamp, "reapplied write still unresolved");
                state.errors.push(entry.id);
            }
            undo.push(entry.undo_twin());
            tentative.push(entry);
        }

        state.tentative.set_entries(tentative);
        state.undo.set_entries(undo);
        Ok(())
    }

    /// The full rollback/reapply cycle driven by a batch of newly-learned
    /// commits: undo every tentative effect, merge the commits into both
    /// stores, then replay the surviving tentative writes on top of the full
    /// store.
    pub async fn rollback_and_reapply(
        state: &mut LogState,
        committed_store: &dyn StateStore,
        full_store: &dyn StateStore,
        new_commits: Vec<LogEntry>,
    ) -> Result<()> {
        let pending = state.tentative.as_slice().to_vec();
        Self::undo_all(state, full_store).await?;
        Self::merge_commits(state, committed_store, full_store, new_commits).await?;
        Self::reapply(state, full_store, pending).await?;
        Ok(())
    }

    /// Highest CSN the caller can claim to have fully incorporated.
    pub fn committed_through(state: &LogState) -> Csn {
        state.omitted
    }
}
