//! The [`SnapshotData`] contract (§3, §4.C).
//!
//! A Snapshot is an opaque, immutable value object: the runtime only ever
//! needs its timestamp and partial-error list, while checkers need the
//! concrete fields a particular collector produces. Rather than type-erase
//! behind `dyn Any`, each collector picks a concrete snapshot type and the
//! runtime, checkers, and ring are generic over it — the idiomatic-Rust
//! shape for "opaque to the framework, concrete to its own checkers".

use chrono::{DateTime, Utc};

/// Bound every concrete snapshot type must satisfy to flow through the
/// Collector → Checkers → Ring pipeline.
pub trait SnapshotData: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Wall-clock time the snapshot was produced. Must satisfy
    /// `T_collect_start <= T <= T_collect_end` (§3 invariants).
    fn timestamp(&self) -> DateTime<Utc>;

    /// Sub-facts that failed to populate during this collect pass but did
    /// not abort it (§4.C partial-failure policy).
    fn partial_errors(&self) -> &[String];

    /// Whether this snapshot's device identifiers are known-stable. False
    /// when UUID resolution has not yet succeeded for at least one device
    /// (§4.C UUID stability) — downstream labels should degrade
    /// gracefully (e.g. fall back to an index) when this is false.
    fn identifiers_valid(&self) -> bool {
        true
    }
}
