//! Connection duration that survives UI restarts
//!
//! The start instant is written to the key-value store the first time a
//! session connects and is only removed by a successful disconnect. A process
//! that restarts while the tunnel stays up keeps counting from the original
//! instant.

use std::sync::Arc;
use std::time::Duration;

use anywhere_store::{KeyValueStore, KeyValueStoreExt, StoreError};

use crate::clock::Clock;

pub struct ElapsedTimeTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ElapsedTimeTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record now as the start of `name`'s session unless a marker exists
    ///
    /// Returns the marker in effect afterwards.
    pub fn mark_started(&self, name: &str) -> Result<u64, StoreError> {
        let key = marker_key(name);
        if let Some(existing) = self.store.get_u64(&key)? {
            tracing::debug!("Keeping start marker {} for {}", existing, name);
            return Ok(existing);
        }

        let now = self.clock.now_ms();
        self.store.set(&key, &now.to_string())?;
        tracing::debug!("Recorded start marker {} for {}", now, name);
        Ok(now)
    }

    pub fn started_at(&self, name: &str) -> Result<Option<u64>, StoreError> {
        self.store.get_u64(&marker_key(name))
    }

    /// Time since the marker, or `None` when no session is recorded
    ///
    /// A marker in the future (clock moved backwards) reads as zero.
    pub fn elapsed(&self, name: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self.started_at(name)?.map(|start| {
            Duration::from_millis(self.clock.now_ms().saturating_sub(start))
        }))
    }

    /// `MM:SS` rendering of [`Self::elapsed`]
    pub fn display(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.elapsed(name)?.map(format_elapsed))
    }

    pub fn clear(&self, name: &str) -> Result<(), StoreError> {
        self.store.remove(&marker_key(name))
    }
}

/// Zero-padded minutes and seconds; minutes keep counting past 59
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn marker_key(name: &str) -> String {
    format!("session.{}.started_at", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use anywhere_store::MemoryStore;

    const T0: u64 = 1_700_000_000_000;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "01:05");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "60:00");
    }

    #[test]
    fn test_marker_survives_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));

        let before = ElapsedTimeTracker::new(store.clone(), clock.clone());
        assert_eq!(before.mark_started("wg0").unwrap(), T0);
        drop(before);

        clock.advance(Duration::from_secs(30));
        let after = ElapsedTimeTracker::new(store.clone(), clock.clone());
        assert_eq!(after.mark_started("wg0").unwrap(), T0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(after.display("wg0").unwrap().as_deref(), Some("00:35"));
    }

    #[test]
    fn test_clear_removes_marker() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tracker = ElapsedTimeTracker::new(store, Arc::new(ManualClock::new(T0)));

        tracker.mark_started("wg0").unwrap();
        tracker.clear("wg0").unwrap();

        assert_eq!(tracker.started_at("wg0").unwrap(), None);
        assert_eq!(tracker.display("wg0").unwrap(), None);
    }

    #[test]
    fn test_future_marker_reads_zero() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("session.wg0.started_at", &(T0 + 10_000).to_string()).unwrap();
        let tracker = ElapsedTimeTracker::new(store, Arc::new(ManualClock::new(T0)));

        assert_eq!(tracker.display("wg0").unwrap().as_deref(), Some("00:00"));
    }
}
