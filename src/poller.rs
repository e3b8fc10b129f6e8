//! The Async Event Poller (§4.F): a background producer of Results from
//! an out-of-band source (an async-event queue, a kernel log file, a
//! cluster log regex set), feeding the same channel as the periodic tick
//! loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{CheckerResult, HealthResult, Severity, Status};

/// One catalog entry describing a recognized out-of-band event kind
/// (§4.F "Event → Result mapping").
#[derive(Debug, Clone)]
pub struct EventCatalogEntry {
    pub name: String,
    /// Groups entries that should backfill one another (§4.F
    /// "Non-critical-event backfill"): e.g. all XID codes share a
    /// family so every scrape sees the full known event surface.
    pub family: String,
    pub level: Severity,
    pub description: String,
    pub error_name: String,
    pub suggestion: String,
}

/// The catalog an [`AsyncEventPoller`] consults to turn a raw
/// [`PolledEvent`] into a [`HealthResult`].
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    entries: Vec<EventCatalogEntry>,
}

impl EventCatalog {
    pub fn new(entries: Vec<EventCatalogEntry>) -> Self {
        Self { entries }
    }

    fn find(&self, name: &str) -> Option<&EventCatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn family_of(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.family.as_str())
    }

    fn others_in_family<'a>(&'a self, family: &str, exclude: &str) -> Vec<&'a EventCatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.family == family && e.name != exclude)
            .collect()
    }

    /// Builds the Result for one recognized event, backfilling a normal
    /// CheckerResult for every other catalog entry of the same family
    /// (§4.F). Returns `None` for an event whose name has no catalog
    /// entry — unrecognized events are dropped, logged at debug.
    fn build_result(&self, item: &str, node: &str, event: PolledEvent) -> Option<HealthResult> {
        let entry = match self.find(&event.name) {
            Some(e) => e,
            None => {
                debug!(component = item, event = %event.name, "dropping unrecognized poller event");
                return None;
            }
        };

        let device = event
            .subject
            .as_ref()
            .map(|s| s.label())
            .unwrap_or_default();

        let primary = CheckerResult {
            name: entry.name.clone(),
            description: entry.description.clone(),
            device,
            spec: String::new(),
            curr: event.detail.clone(),
            status: Status::Abnormal,
            level: entry.level,
            detail: if event.detail.is_empty() {
                entry.description.clone()
            } else {
                event.detail.clone()
            },
            error_name: entry.error_name.clone(),
            suggest: entry.suggestion.clone(),
            labels: Default::default(),
        };

        let mut checkers = vec![primary];
        if let Some(family) = self.family_of(&entry.name) {
            for other in self.others_in_family(family, &entry.name) {
                checkers.push(CheckerResult::all_normal(other.name.clone(), "", ""));
            }
        }

        Some(HealthResult::aggregate(item, node, chrono::Utc::now(), checkers))
    }
}

/// One raw observation surfaced by an [`EventSource`], prior to catalog
/// lookup.
#[derive(Debug, Clone)]
pub struct PolledEvent {
    pub name: String,
    pub subject: Option<crate::model::Subject>,
    pub detail: String,
}

/// The out-of-band producer a concrete component plugs in (NVML async
/// events, `dmesg` tailing, ...). How events are actually sourced is out
/// of scope (§1) — only the polling and mapping contract lives here.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Waits for and returns the next event, or `Ok(None)` if none
    /// arrived within the source's own wait window (the poller sleeps
    /// `poll_interval` before calling again in that case).
    async fn poll(&self) -> Result<Option<PolledEvent>>;
}

/// Drives one [`EventSource`] in a loop, converting events into Results
/// on the shared `resultChannel` (§4.F).
pub struct AsyncEventPoller<S: EventSource> {
    item: String,
    node: String,
    source: Arc<S>,
    catalog: Arc<EventCatalog>,
    poll_interval: Duration,
}

impl<S: EventSource> AsyncEventPoller<S> {
    pub fn new(
        item: impl Into<String>,
        node: impl Into<String>,
        source: Arc<S>,
        catalog: Arc<EventCatalog>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            item: item.into(),
            node: node.into(),
            source,
            catalog,
            poll_interval,
        }
    }

    /// Spawns the poll loop. The returned handle is cancelled by
    /// `cancel`; the loop exits without sending once the channel is
    /// closed or `cancel` fires — it never sends on a closed channel
    /// (§8 testable property "async poller after reinit").
    pub fn spawn(self: Arc<Self>, tx: mpsc::Sender<HealthResult>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    outcome = self.source.poll() => {
                        match outcome {
                            Ok(Some(event)) => {
                                if let Some(result) = self.catalog.build_result(&self.item, &self.node, event) {
                                    if tx.send(result).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Ok(None) => {
                                tokio::select! {
                                    _ = cancel.cancelled() => return,
                                    _ = tokio::time::sleep(self.poll_interval) => {}
                                }
                            }
                            Err(e) => {
                                warn!(component = %self.item, error = %e, "event source poll failed");
                                tokio::select! {
                                    _ = cancel.cancelled() => return,
                                    _ = tokio::time::sleep(self.poll_interval) => {}
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Subject;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> EventCatalog {
        EventCatalog::new(vec![
            EventCatalogEntry {
                name: "Xid79".into(),
                family: "xid".into(),
                level: Severity::Critical,
                description: "GPU fell off the bus".into(),
                error_name: "GPU_FELL_OFF_BUS".into(),
                suggestion: "reseat or replace the card".into(),
            },
            EventCatalogEntry {
                name: "Xid94".into(),
                family: "xid".into(),
                level: Severity::Warning,
                description: "contained ECC error".into(),
                error_name: "CONTAINED_ECC_ERROR".into(),
                suggestion: "monitor".into(),
            },
        ])
    }

    #[test]
    fn recognized_event_backfills_normal_results_for_its_family() {
        let cat = catalog();
        let event = PolledEvent {
            name: "Xid79".into(),
            subject: Some(Subject::new("GPU-0")),
            detail: "bus error detected".into(),
        };
        let result = cat.build_result("Gpu", "node-1", event).unwrap();
        assert_eq!(result.status, crate::model::Status::Abnormal);
        assert_eq!(result.checkers.len(), 2);
        assert_eq!(result.checkers[0].name, "Xid79");
        assert_eq!(result.checkers[0].status, crate::model::Status::Abnormal);
        assert_eq!(result.checkers[1].name, "Xid94");
        assert_eq!(result.checkers[1].status, crate::model::Status::Normal);
    }

    #[test]
    fn unrecognized_event_is_dropped() {
        let cat = catalog();
        let event = PolledEvent {
            name: "XidUnknown".into(),
            subject: None,
            detail: String::new(),
        };
        assert!(cat.build_result("Gpu", "node-1", event).is_none());
    }

    struct CountingSource {
        emitted: AtomicUsize,
    }

    #[async_trait]
    impl EventSource for CountingSource {
        async fn poll(&self) -> Result<Option<PolledEvent>> {
            let n = self.emitted.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(Some(PolledEvent {
                    name: "Xid79".into(),
                    subject: Some(Subject::new("GPU-0")),
                    detail: String::new(),
                }))
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn poller_sends_mapped_result_and_stops_cleanly_on_cancel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let poller = Arc::new(AsyncEventPoller::new(
            "Gpu",
            "node-1",
            Arc::new(CountingSource { emitted: AtomicUsize::new(0) }),
            Arc::new(catalog()),
            Duration::from_millis(10),
        ));
        let handle = poller.spawn(tx, cancel.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.checkers[0].name, "Xid79");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller task should exit promptly on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn poller_exits_without_panicking_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        let poller = Arc::new(AsyncEventPoller::new(
            "Gpu",
            "node-1",
            Arc::new(CountingSource { emitted: AtomicUsize::new(0) }),
            Arc::new(catalog()),
            Duration::from_millis(10),
        ));
        let handle = poller.spawn(tx, cancel);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller task should exit once the send fails")
            .unwrap();
    }
}
