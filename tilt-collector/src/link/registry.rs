//! Shared registry of disabled links.
//!
//! Workers push entries when their retry budget runs out with the `disable`
//! policy; the supervisor snapshots, probes, and removes. Critical sections
//! only copy or mutate the list, probing always happens outside the lock.

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::config::LinkConfig;

/// A link taken out of service after exhausting its retry budget.
#[derive(Debug, Clone)]
pub struct DisabledLink {
    /// Configuration to reopen the link with when it comes back.
    pub config: LinkConfig,
    /// Last failure that pushed the link over its budget.
    pub reason: String,
    /// When the worker gave up on the link.
    pub disabled_at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct LinkRegistry {
    entries: Mutex<Vec<DisabledLink>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, entry: DisabledLink) {
        self.entries.lock().push(entry);
    }

    /// Copy of the current entries, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<DisabledLink> {
        self.entries.lock().clone()
    }

    pub fn remove(&self, path: &str) {
        self.entries.lock().retain(|e| e.config.path != path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_entry(path: &str) -> DisabledLink {
        let config: LinkConfig =
            serde_json::from_str(&format!(r#"{{"path": "{path}"}}"#)).unwrap();
        DisabledLink {
            config,
            reason: "open failed".to_string(),
            disabled_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn should_track_disabled_links() {
        let registry = LinkRegistry::new();
        assert!(registry.is_empty());

        registry.disable(create_entry("/dev/ttyUSB0"));
        registry.disable(create_entry("/dev/ttyUSB1"));
        assert_eq!(registry.len(), 2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].config.path, "/dev/ttyUSB0");
        assert_eq!(snapshot[1].config.path, "/dev/ttyUSB1");
    }

    #[test]
    fn should_remove_only_matching_path() {
        let registry = LinkRegistry::new();
        registry.disable(create_entry("/dev/ttyUSB0"));
        registry.disable(create_entry("/dev/ttyUSB1"));

        registry.remove("/dev/ttyUSB0");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].config.path, "/dev/ttyUSB1");
    }

    #[test]
    fn should_not_mutate_through_snapshot() {
        let registry = LinkRegistry::new();
        registry.disable(create_entry("/dev/ttyUSB0"));

        let mut snapshot = registry.snapshot();
        snapshot.clear();

        assert_eq!(registry.len(), 1);
    }
}
