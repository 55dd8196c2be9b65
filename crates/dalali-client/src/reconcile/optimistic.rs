use super::sequence::Ticket;
use crate::request::RequestError;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
struct Pending<T> {
    id: u64,
    /// What a revert restores.
    previous: T,
    /// Newest fetch ticket issued before the change began.
    after: Ticket,
}

/// A value with at most one tentative change in flight.
///
/// `begin` shows the tentative value immediately and remembers the previous
/// one. The change then ends in exactly one of `commit` (server confirmed),
/// `revert` (request failed) or `supersede` by a fetch that started after
/// it. A fetch that started earlier only replaces what a revert restores.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimistic<T> {
    value: T,
    pending: Option<Pending<T>>,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            pending: None,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Show `tentative` as change `id`.
    ///
    /// `after` is the newest fetch ticket issued so far; fetches up to and
    /// including it started before the change.
    pub fn begin(&mut self, id: u64, tentative: T, after: Ticket) -> Result<(), MutationError> {
        if self.pending.is_some() {
            return Err(MutationError::Pending);
        }
        let previous = std::mem::replace(&mut self.value, tentative);
        self.pending = Some(Pending { id, previous, after });
        Ok(())
    }

    /// Replace the shown value with the server's answer to change `id`.
    ///
    /// Ignored once the change has been superseded.
    pub fn commit(&mut self, id: u64, confirmed: T) -> bool {
        match &self.pending {
            Some(pending) if pending.id == id => {
                self.pending = None;
                self.value = confirmed;
                true
            }
            _ => false,
        }
    }

    /// Restore the value from before change `id`. No-op once the change has
    /// been settled or superseded.
    pub fn revert(&mut self, id: u64) -> bool {
        match self.pending.take() {
            Some(pending) if pending.id == id => {
                self.value = pending.previous;
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    /// Authoritative value from the fetch started with `fetched`.
    ///
    /// Drops a pending change the fetch started after. A change the fetch
    /// predates stays shown and keeps its settlement; the fetched value is
    /// what a revert falls back to. Returns whether the value was replaced.
    pub fn supersede(&mut self, authoritative: T, fetched: Ticket) -> bool {
        match &mut self.pending {
            Some(pending) if fetched <= pending.after => {
                pending.previous = authoritative;
                false
            }
            _ => {
                self.pending = None;
                self.value = authoritative;
                true
            }
        }
    }
}

/// Keyed [`Optimistic`] values behind a lock.
///
/// Change ids come from one counter for the whole map, so a settlement from
/// a change to a key that was since dropped and re-added never matches.
#[derive(Debug)]
pub struct OptimisticMap<K, T> {
    entries: Mutex<HashMap<K, Optimistic<T>>>,
    changes: AtomicU64,
}

impl<K: Eq + Hash + Clone, T: Clone> Default for OptimisticMap<K, T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changes: AtomicU64::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> OptimisticMap<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Optimistic<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<T> {
        self.entries().get(key).map(|entry| entry.value().clone())
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.entries().get(key).is_some_and(Optimistic::is_pending)
    }

    /// Replace everything with the values from the fetch started with
    /// `fetched`. Keys not listed are forgotten. Pending changes are dropped
    /// unless the fetch predates them.
    pub fn supersede_all(&self, values: impl IntoIterator<Item = (K, T)>, fetched: Ticket) {
        let mut entries = self.entries();
        let mut next = HashMap::new();
        for (key, value) in values {
            let entry = match entries.remove(&key) {
                Some(mut entry) => {
                    entry.supersede(value, fetched);
                    entry
                }
                None => Optimistic::new(value),
            };
            next.insert(key, entry);
        }
        *entries = next;
    }

    /// Start a change to `key`, computing the tentative value from the
    /// current one. `after` is the newest fetch ticket issued so far.
    ///
    /// The returned guard reverts the change if dropped unsettled.
    pub fn begin(
        &self,
        key: K,
        after: Ticket,
        tentative: impl FnOnce(&T) -> T,
    ) -> Result<PendingChange<'_, K, T>, MutationError>
    where
        K: std::fmt::Display,
    {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| MutationError::Unknown(key.to_string()))?;
        let value = tentative(entry.value());
        let id = self.changes.fetch_add(1, Ordering::SeqCst) + 1;
        entry.begin(id, value.clone(), after)?;
        Ok(PendingChange {
            map: self,
            key,
            id,
            tentative: value,
            settled: false,
        })
    }

    fn settle(&self, key: &K, f: impl FnOnce(&mut Optimistic<T>) -> bool) -> bool {
        self.entries().get_mut(key).is_some_and(f)
    }
}

/// An unsettled change. Dropping it reverts.
#[must_use = "dropping a pending change reverts it"]
pub struct PendingChange<'a, K: Eq + Hash + Clone, T: Clone> {
    map: &'a OptimisticMap<K, T>,
    key: K,
    id: u64,
    tentative: T,
    settled: bool,
}

impl<K: Eq + Hash + Clone, T: Clone> PendingChange<'_, K, T> {
    pub fn tentative(&self) -> &T {
        &self.tentative
    }

    pub fn commit(mut self, confirmed: T) -> bool {
        self.settled = true;
        let id = self.id;
        self.map.settle(&self.key, |entry| entry.commit(id, confirmed))
    }

    pub fn revert(mut self) -> bool {
        self.settled = true;
        let id = self.id;
        self.map.settle(&self.key, |entry| entry.revert(id))
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Drop for PendingChange<'_, K, T> {
    fn drop(&mut self) {
        if !self.settled {
            let id = self.id;
            self.map.settle(&self.key, |entry| entry.revert(id));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("a change to this item is still pending")]
    Pending,
    #[error("unknown item: {0}")]
    Unknown(String),
    #[error(transparent)]
    Request(#[from] RequestError),
}
