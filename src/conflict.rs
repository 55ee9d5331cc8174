//! Applying a single write against a state store.

use crate::log::{AcceptStamp, EntryId, LogEntry, LogState};
use crate::store::StateStore;
use crate::Result;

/// Result of applying one write's check/merge against the full store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictOutcome {
    pub has_conflict: bool,
    pub was_resolved: bool,
}

pub struct ConflictEngine;

impl ConflictEngine {
    /// Accepts a brand-new client write at this replica.
    ///
    /// Stamps the write with `V[self]+1`, evaluates it against `full_store`,
    /// and appends it (plus its undo twin) to the tentative and undo logs.
    /// Does not schedule CSN assignment — that is the caller's job, see
    /// [`crate::primary`].
    pub async fn accept(
        state: &mut LogState,
        self_id: crate::ReplicaId,
        full_store: &dyn StateStore,
        write_op: String,
        undo_op: String,
        dependency_check: String,
        merge_op: String,
    ) -> Result<ConflictOutcome> {
        let accept_time = state.vector_clock.inc(self_id.index());
        let accept_stamp = AcceptStamp {
            accept_time,
            origin: self_id,
        };
        let entry = LogEntry {
            id: EntryId::new(),
            write_op,
            undo_op,
            dependency_check,
            merge_op,
            accept_stamp,
            csn: 0,
        };

        let outcome = Self::apply(&entry, full_store).await?;
        tracing::debug!(
            accept_stamp = %entry.accept_stamp,
            has_conflict = outcome.has_conflict,
            was_resolved = outcome.was_resolved,
            "accepted write"
        );
        if !outcome.was_resolved {
            tracing::warn!(accept_stamp = %entry.accept_stamp, "write unresolved, recording to error log");
            state.errors.push(entry.id);
        }

        let undo_entry = entry.undo_twin();
        state.tentative.push_back(entry);
        state.undo.push_back(undo_entry);

        Ok(outcome)
    }

    /// The actual check/apply-or-merge transaction, reused verbatim by
    /// [`crate::rollback::RollbackEngine`] to reapply an existing entry
    /// without restamping or re-appending it.
    pub async fn apply(entry: &LogEntry, store: &dyn StateStore) -> Result<ConflictOutcome> {
        let passed = store.check(&entry.dependency_check).await?;

        if passed {
            store.execute(&entry.write_op).await?;
            Ok(ConflictOutcome {
                has_conflict: false,
                was_resolved: true,
            })
        } else {
            let was_resolved = store.check(&entry.merge_op).await?;
            Ok(ConflictOutcome {
                has_conflict: true,
                was_resolved,
            })
        }
    }
}
