//! Commit sequence number assignment, performed only by the primary.
//!
//! A replica that is not the configured primary never calls into this
//! module directly — it learns CSNs from the primary through anti-entropy
//! instead. See [`crate::replica::Replica::is_primary`].

use crate::log::{Csn, LogEntry, LogState};
use crate::{Error, Result};

pub struct PrimaryCommit;

impl PrimaryCommit {
    /// Walks the tentative log in accept-stamp order and assigns the next
    /// CSN to every entry that doesn't already have one, moving each from
    /// the tentative log to the commit log — and striking its undo twin
    /// from the undo log, since an entry that's left the tentative log for
    /// good no longer has anything for [`crate::rollback::RollbackEngine`]
    /// to undo.
    ///
    /// Entries already carrying a CSN (merged in from another replica
    /// before this replica got a chance to commit them) are left in place.
    /// Returns the newly committed entries, in CSN order, for the caller to
    /// broadcast.
    pub fn commit_pending(
        state: &mut LogState,
        self_id: crate::ReplicaId,
        is_primary: bool,
    ) -> Result<Vec<LogEntry>> {
        if !is_primary {
            return Err(Error::NotPrimary(self_id));
        }

        let mut next_csn = state.omitted + 1;
        let mut remaining = Vec::new();
        let mut newly_committed = Vec::new();

        for mut entry in state.tentative.take_entries() {
            if entry.is_committed() {
                remaining.push(entry);
                continue;
            }
            entry.csn = next_csn;
            next_csn += 1;
            state.undo.remove_by_id(entry.id);
            state.omitted = entry.csn;
            newly_committed.push(entry.clone());
            state.commit.push_back(entry);
        }

        state.tentative.set_entries(remaining);
        Ok(newly_committed)
    }

    /// The CSN that would be assigned to the next freshly-accepted write.
    pub fn next_csn(state: &LogState) -> Csn {
        state.omitted + 1
    }
}
