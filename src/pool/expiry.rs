//! Deadline-ordered list of idle connections.
//!
//! The entry with the farthest deadline sits at the head (front) and the one
//! closest to expiry at the tail (back). Newly released connections usually
//! carry the farthest deadline, so insertion scans from the head and
//! typically stops after a step or two; purging pops from the tail and stops
//! at the first entry that is still live.
//!
//! All methods except [`PurgeHint::maybe_required`] must be called with the
//! pool lock held.

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ExpiryEntry<T> {
    item: Arc<T>,
    expiry: DateTime<Utc>,
}

/// Loosely accurate "the list may hold entries" flag, readable without the lock.
///
/// Refreshed at the end of every mutation. It may briefly report entries that
/// are already gone, never the reverse.
#[derive(Debug, Clone, Default)]
pub(crate) struct PurgeHint(Arc<AtomicBool>);

impl PurgeHint {
    pub(crate) fn maybe_required(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

pub(crate) struct ExpiryList<T> {
    entries: VecDeque<ExpiryEntry<T>>,
    hint: PurgeHint,
}

/// Absolute expiry: release time truncated to whole seconds, plus keep-alive.
fn deadline(now: DateTime<Utc>, keep_alive: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(keep_alive)
        .ok()
        .and_then(|delta| now.trunc_subsecs(0).checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<T> ExpiryList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            hint: PurgeHint::default(),
        }
    }

    pub(crate) fn hint(&self) -> PurgeHint {
        self.hint.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert `item` with deadline `now` (truncated to seconds) + `keep_alive`.
    ///
    /// An item lands in front of every entry that expires no later than it
    /// does, so among equal deadlines the most recent release is nearest the
    /// head.
    pub(crate) fn insert(&mut self, item: Arc<T>, now: DateTime<Utc>, keep_alive: Duration) {
        let expiry = deadline(now, keep_alive);
        let at = self
            .entries
            .iter()
            .position(|entry| entry.expiry <= expiry)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, ExpiryEntry { item, expiry });
        self.hint.set(true);
    }

    /// Pop the entry closest to expiry.
    pub(crate) fn remove_oldest(&mut self) -> Option<Arc<T>> {
        let entry = self.entries.pop_back();
        self.hint.set(!self.entries.is_empty());
        entry.map(|e| e.item)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// nearest deadline first.
    pub(crate) fn purge_until(&mut self, now: DateTime<Utc>) -> Vec<Arc<T>> {
        let mut expired = Vec::new();
        while let Some(tail) = self.entries.back() {
            if tail.expiry > now {
                break;
            }
            if let Some(entry) = self.entries.pop_back() {
                expired.push(entry.item);
            }
        }
        self.hint.set(!self.entries.is_empty());
        expired
    }

    /// Remove `item` by identity. Returns whether it was present.
    pub(crate) fn remove(&mut self, item: &Arc<T>) -> bool {
        let Some(at) = self
            .entries
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.item, item))
        else {
            return false;
        };
        self.entries.remove(at);
        self.hint.set(!self.entries.is_empty());
        true
    }

    pub(crate) fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|entry| entry.expiry)
    }

    /// Empty the list, returning every item.
    pub(crate) fn drain(&mut self) -> Vec<Arc<T>> {
        let items = self.entries.drain(..).map(|entry| entry.item).collect();
        self.hint.set(false);
        items
    }
}
