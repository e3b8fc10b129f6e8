//! Registry & Frequency Controller (§4.G): process-wide component
//! bookkeeping and a shared view of query intervals.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

/// A process-wide, one-instance-per-name map, populated by a "new-once"
/// gate: repeated construction with the same name returns the first
/// instance (§4.G, §9 design notes — any once-gate primitive is legal,
/// `dashmap`'s atomic entry API is the idiomatic choice here).
pub struct Registry<T> {
    components: DashMap<String, Arc<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            components: DashMap::new(),
        }
    }

    /// Returns the existing instance for `name` if one exists, otherwise
    /// builds and inserts one via `build`. `build` runs at most once per
    /// name even under concurrent callers.
    pub fn get_or_insert_with(&self, name: &str, build: impl FnOnce() -> T) -> Arc<T> {
        self.components
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.components.get(name).map(|e| e.clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.components.remove(name).map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<String> {
        self.components.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A central coordinator every component registers its configured
/// interval with on creation, exposing a single "current interval" view
/// (§4.G). Setting a global override lets an operator quiesce the whole
/// fleet's poll rate without restarting any component.
pub struct FrequencyController {
    intervals: DashMap<String, Duration>,
    global_override: RwLock<Option<Duration>>,
}

impl Default for FrequencyController {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyController {
    pub fn new() -> Self {
        Self {
            intervals: DashMap::new(),
            global_override: RwLock::new(None),
        }
    }

    pub fn register(&self, name: &str, interval: Duration) {
        self.intervals.insert(name.to_string(), interval);
    }

    /// The interval a component should poll at right now: the global
    /// override when one is set, else the component's own registered
    /// interval, else `fallback`.
    pub fn current_interval(&self, name: &str, fallback: Duration) -> Duration {
        if let Some(over) = *self.global_override.read() {
            return over;
        }
        self.intervals
            .get(name)
            .map(|v| *v)
            .unwrap_or(fallback)
    }

    pub fn set_global_override(&self, interval: Option<Duration>) {
        *self.global_override.write() = interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_construction_returns_same_instance() {
        let reg: Registry<u32> = Registry::new();
        let mut calls = 0;
        let a = reg.get_or_insert_with("gpu", || {
            calls += 1;
            1
        });
        let b = reg.get_or_insert_with("gpu", || {
            calls += 1;
            2
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls, 1);
    }

    #[test]
    fn global_override_wins_over_per_component_interval() {
        let fc = FrequencyController::new();
        fc.register("gpu", Duration::from_secs(30));
        assert_eq!(fc.current_interval("gpu", Duration::from_secs(1)), Duration::from_secs(30));

        fc.set_global_override(Some(Duration::from_secs(300)));
        assert_eq!(fc.current_interval("gpu", Duration::from_secs(1)), Duration::from_secs(300));

        fc.set_global_override(None);
        assert_eq!(fc.current_interval("gpu", Duration::from_secs(1)), Duration::from_secs(30));
    }

    #[test]
    fn unregistered_component_gets_fallback() {
        let fc = FrequencyController::new();
        assert_eq!(fc.current_interval("unknown", Duration::from_secs(7)), Duration::from_secs(7));
    }
}
