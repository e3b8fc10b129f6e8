//! The Collector Interface (§4.C) and the native-handle lifecycle it
//! owns.
//!
//! Per §1, *how* NVML/sysfs/InfiniBand counters are actually read is out
//! of scope — only the interface and the handle state machine live here.
//! [`NativeHandle`] is the reusable primitive a concrete collector builds
//! on; it replaces the "double-pointer hack" called out in the design
//! notes (§9) with a plain readers-writer lock: every probe takes the
//! read side, `reinit` takes the write side and excludes all probing
//! while it runs.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::snapshot::SnapshotData;

/// The three states a native handle moves through (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Valid,
    Invalid,
    Reinitializing,
}

impl HandleState {
    fn to_tag(self) -> u8 {
        match self {
            HandleState::Valid => 0,
            HandleState::Invalid => 1,
            HandleState::Reinitializing => 2,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => HandleState::Valid,
            1 => HandleState::Invalid,
            _ => HandleState::Reinitializing,
        }
    }
}

/// A native library handle (NVML context, InfiniBand verbs device, ...)
/// guarded by a readers-writer lock, with an explicit valid/invalid/
/// reinitializing state tag.
///
/// All probe calls should hold [`NativeHandle::read`] for the duration of
/// the native call; `reinit` excludes every reader while it swaps the
/// underlying value.
pub struct NativeHandle<T> {
    state: AtomicU8,
    inner: RwLock<Option<T>>,
}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Send + Sync> NativeHandle<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: AtomicU8::new(HandleState::Valid.to_tag()),
            inner: RwLock::new(Some(value)),
        }
    }

    /// Construct an already-invalid handle, e.g. when a component's
    /// `new()` could not acquire the resource at all and defers the
    /// failure to the first health check (§4.E "Initialization
    /// failures").
    pub fn new_invalid() -> Self {
        Self {
            state: AtomicU8::new(HandleState::Invalid.to_tag()),
            inner: RwLock::new(None),
        }
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_tag(self.state.load(Ordering::Acquire))
    }

    /// Takes the read side of the lock for the duration of one probe.
    /// Returns `None` if the handle is not currently valid — callers
    /// should treat this as a handle-invalidation error.
    pub async fn read(&self) -> Option<NativeHandleGuard<'_, T>> {
        if self.state() != HandleState::Valid {
            return None;
        }
        let guard = self.inner.read().await;
        if guard.is_none() {
            return None;
        }
        Some(NativeHandleGuard { guard })
    }

    /// Marks the handle invalid after a probe observed a handle-
    /// invalidating error class (§4.C transition `valid -> invalid`).
    pub fn invalidate(&self) {
        self.state.store(HandleState::Invalid.to_tag(), Ordering::Release);
    }

    /// Reinitializes the handle under the exclusive write lock, blocking
    /// all other probe calls for its duration (§4.C transition
    /// `invalid -> reinitializing -> valid|invalid`).
    pub async fn reinit<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.state
            .store(HandleState::Reinitializing.to_tag(), Ordering::Release);
        let mut guard = self.inner.write().await;
        match f().await {
            Ok(value) => {
                *guard = Some(value);
                self.state.store(HandleState::Valid.to_tag(), Ordering::Release);
                Ok(())
            }
            Err(e) => {
                *guard = None;
                self.state.store(HandleState::Invalid.to_tag(), Ordering::Release);
                Err(e)
            }
        }
    }
}

/// A held read-side reference to a valid native handle.
pub struct NativeHandleGuard<'a, T> {
    guard: RwLockReadGuard<'a, Option<T>>,
}

impl<'a, T> std::ops::Deref for NativeHandleGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard constructed only when Some")
    }
}

/// Produces one immutable [`SnapshotData`] per tick (§4.C).
///
/// `collect` is called exactly once per tick by the Component Runtime,
/// never concurrently with itself for the same component — the runtime's
/// `health_check_mtx` enforces that (§4.E).
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    type Snapshot: SnapshotData;

    /// Gathers one full observation. Per §4.D, a non-nil error is
    /// returned only when no sub-facts at all could be gathered, or when
    /// a handle-invalidating error occurred ([`crate::Error::is_handle_invalidation`]);
    /// any other partial failure is recorded on the snapshot itself.
    async fn collect(&self) -> Result<Self::Snapshot>;

    /// Reacquires the native handle. Called by the runtime only while the
    /// handle is [`HandleState::Invalid`].
    async fn reinit(&self) -> Result<()>;

    /// Current native-handle lifecycle state.
    fn handle_state(&self) -> HandleState;
}
