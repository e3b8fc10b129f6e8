//! The Result Ring & Cache (§4.D): a fixed-capacity, single-writer /
//! many-reader circular buffer of snapshots and results.
//!
//! The lock here is a [`parking_lot::RwLock`] rather than the
//! `tokio::sync` kind used elsewhere in the runtime: every hold is
//! synchronous and never spans an `.await`, so the blocking lock is both
//! correct and cheaper (§5 shared-resource policy: "readers take a read
//! lock over the Ring lock").

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::model::HealthResult;
use crate::snapshot::SnapshotData;

struct RingInner<S> {
    /// The paired snapshot is itself optional: synthetic Results
    /// (timeout, panic, collect failure, init error) have no snapshot to
    /// pair with, but still occupy a ring slot like any other tick (§8
    /// "the Ring at index (post-1) mod cap equals the sent Result").
    slots: Vec<Option<(Option<S>, HealthResult)>>,
    /// Index the *next* write will land on.
    next: usize,
}

/// Bounded history of (Snapshot, HealthResult) pairs for one component.
pub struct ResultRing<S: SnapshotData> {
    capacity: usize,
    inner: RwLock<RingInner<S>>,
}

impl<S: SnapshotData> ResultRing<S> {
    /// Capacity is fixed at construction; zero is rejected (§4.D
    /// invariants — "caller must supply >= 1").
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("ring capacity must be >= 1".into()));
        }
        Ok(Self {
            capacity,
            inner: RwLock::new(RingInner {
                slots: (0..capacity).map(|_| None).collect(),
                next: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Atomically writes the snapshot/result pair at the current index
    /// and advances it (§4.D writer contract). `snapshot` is `None` for
    /// synthetic Results produced by the harness or pipeline failure
    /// paths, which never obtained one.
    pub fn append(&self, snapshot: Option<S>, result: HealthResult) {
        let mut inner = self.inner.write();
        let idx = inner.next;
        inner.slots[idx] = Some((snapshot, result));
        inner.next = (idx + 1) % self.capacity;
    }

    /// The most recently written Result, wrapping `(index - 1) mod
    /// capacity` back to `capacity - 1` when `index` is 0 (§4.D
    /// invariants).
    pub fn last(&self) -> Option<HealthResult> {
        let inner = self.inner.read();
        let last_idx = (inner.next + self.capacity - 1) % self.capacity;
        inner.slots[last_idx].as_ref().map(|(_, r)| r.clone())
    }

    pub fn last_snapshot(&self) -> Option<S> {
        let inner = self.inner.read();
        let last_idx = (inner.next + self.capacity - 1) % self.capacity;
        inner.slots[last_idx].as_ref().and_then(|(s, _)| s.clone())
    }

    /// All filled slots, oldest to newest.
    pub fn all(&self) -> Vec<HealthResult> {
        let inner = self.inner.read();
        self.ordered(&inner)
            .into_iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn all_snapshots(&self) -> Vec<S> {
        let inner = self.inner.read();
        self.ordered(&inner)
            .into_iter()
            .filter_map(|(s, _)| s.clone())
            .collect()
    }

    fn ordered<'a>(&self, inner: &'a RingInner<S>) -> Vec<&'a (Option<S>, HealthResult)> {
        let mut out = Vec::with_capacity(self.capacity);
        // Oldest entry is at `next` once the ring has wrapped at least
        // once; before that it's simply index 0.
        for offset in 0..self.capacity {
            let idx = (inner.next + offset) % self.capacity;
            if let Some(entry) = &inner.slots[idx] {
                out.push(entry);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone)]
    struct S(u32);
    impl SnapshotData for S {
        fn timestamp(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn partial_errors(&self) -> &[String] {
            &[]
        }
    }

    fn result(tag: &str) -> HealthResult {
        HealthResult::aggregate(tag, "node-1", Utc::now(), vec![])
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(ResultRing::<S>::new(0).is_err());
    }

    #[test]
    fn cache_size_three_after_five_ticks_holds_three_last_is_fifth() {
        let ring = ResultRing::new(3).unwrap();
        for i in 1..=5 {
            ring.append(Some(S(i)), result(&format!("tick-{i}")));
        }
        assert_eq!(ring.all().len(), 3);
        assert_eq!(ring.last().unwrap().item, "tick-5");
    }

    #[test]
    fn nth_plus_one_write_overwrites_oldest() {
        let ring = ResultRing::new(2).unwrap();
        ring.append(Some(S(1)), result("a"));
        ring.append(Some(S(2)), result("b"));
        ring.append(Some(S(3)), result("c"));
        let all: Vec<_> = ring.all().into_iter().map(|r| r.item).collect();
        assert_eq!(all, vec!["b", "c"]);
    }

    #[test]
    fn last_wraps_to_capacity_minus_one_when_index_is_zero() {
        let ring = ResultRing::new(2).unwrap();
        ring.append(Some(S(1)), result("a"));
        ring.append(Some(S(2)), result("b"));
        // next index is now back to 0; last() must still resolve to "b".
        assert_eq!(ring.last().unwrap().item, "b");
    }

    #[test]
    fn unfilled_slots_are_absent_from_all() {
        let ring = ResultRing::new(4).unwrap();
        ring.append(Some(S(1)), result("a"));
        assert_eq!(ring.all().len(), 1);
        assert!(ring.last().is_some());
    }

    #[test]
    fn synthetic_result_with_no_snapshot_still_occupies_a_slot() {
        let ring = ResultRing::new(2).unwrap();
        ring.append(None, result("timeout"));
        assert_eq!(ring.all().len(), 1);
        assert!(ring.last_snapshot().is_none());
        assert_eq!(ring.last().unwrap().item, "timeout");
    }
}
