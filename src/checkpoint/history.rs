use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::CheckpointEntry;
use crate::WalPointer;

/// Completed checkpoints, oldest first, and the floor of the checkpoint in
/// progress.
///
/// Floors of the entries never decrease from the oldest to the newest, so
/// the oldest entry's floor is the earliest WAL position any retained
/// checkpoint needs.
#[derive(Debug, Default)]
pub struct CheckpointHistory {
    inner: Mutex<HistoryInner>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    entries: VecDeque<CheckpointEntry>,

    /// Lower bound of the floor of the running checkpoint.
    in_progress: Option<WalPointer>,

    /// Largest id ever seen, including evicted entries.
    last_id: u64,
}

impl CheckpointHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from entries restored from disk.
    pub(crate) fn from_entries(mut entries: Vec<CheckpointEntry>) -> Self {
        entries.sort_by_key(|e| e.id);

        let history = Self::new();
        for e in entries {
            history.append(e);
        }
        history
    }

    fn lock(&self) -> MutexGuard<'_, HistoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a completed checkpoint as the newest entry.
    ///
    /// Its id must be greater than every id seen so far.
    pub fn append(&self, entry: CheckpointEntry) {
        let mut inner = self.lock();
        debug_assert!(
            inner.entries.back().map_or(true, |last| last.id < entry.id),
            "checkpoint id must increase: {}",
            entry.id
        );
        inner.last_id = inner.last_id.max(entry.id);
        inner.entries.push_back(entry);
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<CheckpointEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn first(&self) -> Option<CheckpointEntry> {
        self.lock().entries.front().cloned()
    }

    pub fn last(&self) -> Option<CheckpointEntry> {
        self.lock().entries.back().cloned()
    }

    pub fn last_id(&self) -> u64 {
        self.lock().last_id
    }

    /// The floor of the oldest retained entry.
    pub fn earliest_required_pointer(&self) -> Option<WalPointer> {
        self.lock().entries.front().map(|e| e.floor)
    }

    /// The lowest WAL position still needed: the oldest retained floor, or
    /// the floor of a running checkpoint if that is lower.
    ///
    /// `None` if there is neither a completed nor a running checkpoint, in
    /// which case nothing may be deleted.
    pub fn safe_floor(&self) -> Option<WalPointer> {
        let inner = self.lock();
        let oldest = inner.entries.front().map(|e| e.floor);

        match (oldest, inner.in_progress) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Evict the oldest entries until at most `cap` remain. Returns the
    /// evicted entries, oldest first.
    pub fn prune_to_cap(&self, cap: usize) -> Vec<CheckpointEntry> {
        let mut inner = self.lock();
        let mut evicted = vec![];

        while inner.entries.len() > cap {
            if let Some(e) = inner.entries.pop_front() {
                evicted.push(e);
            }
        }
        evicted
    }

    /// Evict the oldest entry while `pred` holds for it. The newest entry is
    /// never evicted. Returns the evicted entries, oldest first.
    pub fn evict_oldest_while<F>(&self, mut pred: F) -> Vec<CheckpointEntry>
    where F: FnMut(&CheckpointEntry) -> bool {
        let mut inner = self.lock();
        let mut evicted = vec![];

        while inner.entries.len() > 1 {
            let Some(oldest) = inner.entries.front() else {
                break;
            };

            if !pred(oldest) {
                break;
            }

            if let Some(e) = inner.entries.pop_front() {
                evicted.push(e);
            }
        }
        evicted
    }

    /// Publish the floor lower bound of a starting checkpoint and return it.
    ///
    /// A new checkpoint's floor is never below the newest retained floor.
    /// Without any entry the bound is the start of the WAL, which protects
    /// every segment until the checkpoint completes.
    pub(crate) fn begin_checkpoint(&self) -> WalPointer {
        let mut inner = self.lock();
        let lower = inner.entries.back().map(|e| e.floor).unwrap_or_default();
        inner.in_progress = Some(lower);
        lower
    }

    pub(crate) fn abort_checkpoint(&self) {
        self.lock().in_progress = None;
    }

    /// Append the completed entry, clear the in-progress floor, and prune to
    /// `cap`. Returns the pruned entries.
    pub(crate) fn finish_checkpoint(
        &self,
        entry: CheckpointEntry,
        cap: Option<usize>,
    ) -> Vec<CheckpointEntry> {
        self.append(entry);
        self.lock().in_progress = None;

        match cap {
            Some(cap) => self.prune_to_cap(cap),
            None => vec![],
        }
    }
}
