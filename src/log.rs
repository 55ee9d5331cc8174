//! Stamped log records and the three ordered logs that hold them.
//!
//! A single [`LogEntry`] shape is reused for the tentative log, the commit
//! log, and the undo log: the undo's own check/merge are trivial true/false
//! placeholders, kept uniform so rollback can re-accept an undo entry
//! through the same machinery as a normal write. What distinguishes the
//! three logs is only which vector they live in and which fields are
//! load-bearing there.

use crate::vector_clock::VectorClock;
use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dense positive integer assigned by the primary; `0` means "not yet committed".
pub type Csn = u64;

/// `(accept_time, origin)`, lexicographically ordered — the canonical tentative order.
///
/// Field declaration order matters: `#[derive(Ord)]` compares fields in
/// declaration order, which is exactly the lexicographic order tentative
/// entries must be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcceptStamp {
    pub accept_time: u64,
    pub origin: ReplicaId,
}

impl std::fmt::Display for AcceptStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.accept_time, self.origin)
    }
}

/// Opaque identifier distinguishing log entries regardless of which log (or
/// which replica's copy of a log) they sit in. Stands in for reference
/// identity, since entries are cloned across replicas rather than shared by
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// A stamped record: `{ write_op, undo_op, dependency_check, merge_op, accept_stamp, csn }`.
///
/// Every `*_op` is an opaque query string the state store executes; the
/// engine never parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub write_op: String,
    pub undo_op: String,
    pub dependency_check: String,
    pub merge_op: String,
    pub accept_stamp: AcceptStamp,
    pub csn: Csn,
}

impl LogEntry {
    pub fn is_committed(&self) -> bool {
        self.csn != 0
    }

    /// Builds the undo-log twin of this entry: same identity and
    /// accept-stamp, `write_op` replaced by the original's `undo_op`, and
    /// trivial check/merge placeholders so the entry can be carried through
    /// the same `LogEntry` machinery as a tentative entry.
    pub fn undo_twin(&self) -> LogEntry {
        LogEntry {
            id: self.id,
            write_op: self.undo_op.clone(),
            undo_op: self.write_op.clone(),
            dependency_check: crate::store::TRUE_SENTINEL.to_string(),
            merge_op: crate::store::FALSE_SENTINEL.to_string(),
            accept_stamp: self.accept_stamp,
            csn: 0,
        }
    }
}

/// Ordered by `AcceptStamp` ascending. Holds writes not yet assigned a CSN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TentativeLog {
    entries: Vec<LogEntry>,
}

impl TentativeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Appends strictly at the end. Caller (ConflictEngine) guarantees the
    /// new entry's accept-stamp is greater than every existing one.
    pub fn push_back(&mut self, entry: LogEntry) {
        debug_assert!(
            self.entries
                .last()
                .map(|last| last.accept_stamp < entry.accept_stamp)
                .unwrap_or(true),
            "push_back must preserve ascending accept-stamp order"
        );
        self.entries.push(entry);
    }

    /// Inserts at the position determined by accept-stamp, preserving order.
    pub fn insert_sorted(&mut self, entry: LogEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.accept_stamp < entry.accept_stamp);
        self.entries.insert(pos, entry);
    }

    pub fn contains(&self, stamp: AcceptStamp) -> bool {
        self.entries
            .binary_search_by_key(&stamp, |e| e.accept_stamp)
            .is_ok()
    }

    /// Removes and returns the entry with the given accept-stamp, if present.
    pub fn remove_by_stamp(&mut self, stamp: AcceptStamp) -> Option<LogEntry> {
        let idx = self
            .entries
            .binary_search_by_key(&stamp, |e| e.accept_stamp)
            .ok()?;
        Some(self.entries.remove(idx))
    }

    /// Replaces the contents wholesale, e.g. after a resort during rollback.
    pub fn set_entries(&mut self, mut entries: Vec<LogEntry>) {
        entries.sort_by_key(|e| e.accept_stamp);
        self.entries = entries;
    }

    pub fn take_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn max_accept_stamp(&self) -> Option<AcceptStamp> {
        self.entries.last().map(|e| e.accept_stamp)
    }
}

/// Ordered by `Csn` ascending. Holds writes that have been assigned a CSN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitLog {
    entries: Vec<LogEntry>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Appends strictly at the end; CSNs are assigned in increasing order by
    /// construction (PrimaryCommit, or anti-entropy delivering in CSN order).
    pub fn push_back(&mut self, entry: LogEntry) {
        debug_assert!(entry.is_committed());
        debug_assert!(
            self.entries
                .last()
                .map(|last| last.csn < entry.csn)
                .unwrap_or(true),
            "commit log must stay ascending by csn"
        );
        self.entries.push(entry);
    }

    pub fn highest_csn(&self) -> Csn {
        self.entries.last().map(|e| e.csn).unwrap_or(0)
    }

    pub fn entries_after(&self, csn: Csn) -> impl Iterator<Item = &LogEntry> {
        let pos = self.entries.partition_point(|e| e.csn <= csn);
        self.entries[pos..].iter()
    }

    pub fn contains_accept_stamp(&self, stamp: AcceptStamp) -> bool {
        self.entries.iter().any(|e| e.accept_stamp == stamp)
    }
}

/// Parallel to the tentative log, same order. Each element reverses the
/// effect of the tentative entry that shares its [`EntryId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoLog {
    entries: Vec<LogEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn push_back(&mut self, undo: LogEntry) {
        self.entries.push(undo);
    }

    /// Entries in reverse order — the order rollback must apply them in.
    pub fn iter_rev(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    pub fn remove_by_id(&mut self, id: EntryId) -> Option<LogEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    pub fn take_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn set_entries(&mut self, entries: Vec<LogEntry>) {
        self.entries = entries;
    }
}

/// Writes that produced an unresolved conflict. A record of `EntryId`s
/// pointing back into the commit/tentative logs, not a copy of the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    ids: Vec<EntryId>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn push(&mut self, id: EntryId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[EntryId] {
        &self.ids
    }
}

/// Everything that makes up a replica's durable, mutating state: the
/// version vector, the three logs, and the OMITTED counter. Bundled so
/// [`crate::conflict::ConflictEngine`], [`crate::rollback::RollbackEngine`],
/// and [`crate::primary`] can each borrow exactly the pieces they touch,
/// separate from the orchestration concerns [`crate::replica::Replica`]
/// owns on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogState {
    pub vector_clock: VectorClock,
    pub tentative: TentativeLog,
    pub undo: UndoLog,
    pub commit: CommitLog,
    pub errors: ErrorLog,
    pub omitted: Csn,
}

impl LogState {
    pub fn new(n: usize) -> Self {
        Self {
            vector_clock: VectorClock::new(n),
            tentative: TentativeLog::new(),
            undo: UndoLog::new(),
            commit: CommitLog::new(),
            errors: ErrorLog::new(),
            omitted: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(t: u64, origin: u32) -> AcceptStamp {
        AcceptStamp {
            accept_time: t,
            origin: ReplicaId(origin),
        }
    }

    fn entry(stamp: AcceptStamp, csn: Csn) -> LogEntry {
        LogEntry {
            id: EntryId::new(),
            write_op: "w".into(),
            undo_op: "u".into(),
            dependency_check: "c".into(),
            merge_op: "m".into(),
            accept_stamp: stamp,
            csn,
        }
    }

    #[test]
    fn accept_stamp_orders_lexicographically() {
        assert!(stamp(1, 0) < stamp(1, 1));
        assert!(stamp(1, 5) < stamp(2, 0));
    }

    #[test]
    fn tentative_log_insert_sorted_keeps_order() {
        let mut log = TentativeLog::new();
        log.insert_sorted(entry(stamp(2, 0), 0));
        log.insert_sorted(entry(stamp(1, 0), 0));
        log.insert_sorted(entry(stamp(1, 1), 0));
        let stamps: Vec<_> = log.iter().map(|e| e.accept_stamp).collect();
        assert_eq!(stamps, vec![stamp(1, 0), stamp(1, 1), stamp(2, 0)]);
    }

    #[test]
    fn tentative_log_remove_by_stamp() {
        let mut log = TentativeLog::new();
        log.push_back(entry(stamp(1, 0), 0));
        log.push_back(entry(stamp(2, 0), 0));
        let removed = log.remove_by_stamp(stamp(1, 0)).unwrap();
        assert_eq!(removed.accept_stamp, stamp(1, 0));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn commit_log_entries_after_filters_by_csn() {
        let mut log = CommitLog::new();
        log.push_back(entry(stamp(1, 0), 1));
        log.push_back(entry(stamp(2, 0), 2));
        log.push_back(entry(stamp(3, 0), 3));
        let after: Vec<_> = log.entries_after(1).map(|e| e.csn).collect();
        assert_eq!(after, vec![2, 3]);
    }

    #[test]
    fn undo_twin_swaps_write_and_undo_ops() {
        let e = entry(stamp(1, 0), 0);
        let twin = e.undo_twin();
        assert_eq!(twin.write_op, e.undo_op);
        assert_eq!(twin.undo_op, e.write_op);
        assert_eq!(twin.id, e.id);
        assert_eq!(twin.dependency_check, crate::store::TRUE_SENTINEL);
        assert_eq!(twin.merge_op, crate::store::FALSE_SENTINEL);
    }

    #[test]
    fn error_log_dedupes_ids() {
        let mut log = ErrorLog::new();
        let id = EntryId::new();
        log.push(id);
        log.push(id);
        assert_eq!(log.len(), 1);
    }
}
