//! Registry of fingerprints already accepted for a batch

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::fingerprint::Fingerprint;

#[derive(Debug, Default)]
struct SeenInner {
    set: HashSet<Fingerprint>,
    // insertion order, for exclusion hints
    order: Vec<Fingerprint>,
}

/// Append-only fingerprint set shared by every slot of one batch.
///
/// `add` performs check-and-insert under one lock, so parallel slots can
/// never both accept the same new fingerprint.
#[derive(Debug, Default)]
pub struct SeenFingerprintSet {
    inner: Mutex<SeenInner>,
}

impl SeenFingerprintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded<I>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let set = Self::new();
        set.seed_from(fingerprints);
        set
    }

    fn lock(&self) -> MutexGuard<'_, SeenInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.lock().set.contains(fp)
    }

    /// Insert `fp`; returns false when it was already present
    pub fn add(&self, fp: Fingerprint) -> bool {
        let mut inner = self.lock();
        if inner.set.insert(fp.clone()) {
            inner.order.push(fp);
            true
        } else {
            false
        }
    }

    pub fn seed_from<I>(&self, fingerprints: I)
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let mut inner = self.lock();
        for fp in fingerprints {
            if fp.as_str().is_empty() {
                continue;
            }
            if inner.set.insert(fp.clone()) {
                inner.order.push(fp);
            }
        }
    }

    /// The `limit` most recently added fingerprints, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Fingerprint> {
        let inner = self.lock();
        let start = inner.order.len().saturating_sub(limit);
        inner.order[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_duplicates() {
        let seen = SeenFingerprintSet::new();
        assert!(seen.add(Fingerprint::from("aa")));
        assert!(!seen.add(Fingerprint::from("aa")));
        assert!(seen.contains(&Fingerprint::from("aa")));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn seed_skips_blank_and_repeated_hashes() {
        let seen = SeenFingerprintSet::seeded(
            ["a", "", "b", "a"].into_iter().map(Fingerprint::from),
        );
        assert_eq!(seen.len(), 2);
        assert!(!seen.is_empty());
    }

    #[test]
    fn recent_returns_tail_in_insertion_order() {
        let seen = SeenFingerprintSet::seeded(
            ["1", "2", "3", "4"].into_iter().map(Fingerprint::from),
        );
        seen.add(Fingerprint::from("5"));
        let tail: Vec<String> = seen.recent(3).into_iter().map(|f| f.into_string()).collect();
        assert_eq!(tail, vec!["3", "4", "5"]);
        assert_eq!(seen.recent(50).len(), 5);
        assert!(seen.recent(0).is_empty());
    }

    #[test]
    fn concurrent_adds_accept_each_fingerprint_once() {
        let seen = std::sync::Arc::new(SeenFingerprintSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = seen.clone();
                std::thread::spawn(move || seen.add(Fingerprint::from("same")))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(accepted, 1);
    }
}
