use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Runtime overrides layered on top of the loaded configuration.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOverrideStore {
    entries: BTreeMap<String, OverrideEntry>,
}

#[derive(Clone, Debug)]
struct OverrideEntry {
    value: Value,
    owner: String,
    expires_at: Option<Instant>,
}

impl RuntimeOverrideStore {
    /// Stores an override, returning the owner of the one it replaced.
    pub fn insert(
        &mut self,
        path: String,
        value: Value,
        owner: String,
        ttl: Option<Duration>,
    ) -> Option<String> {
        let expires_at = ttl.map(|dur| Instant::now() + dur);
        self.entries
            .insert(
                path,
                OverrideEntry {
                    value,
                    owner,
                    expires_at,
                },
            )
            .map(|previous| previous.owner)
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Drops expired entries and returns the rest in path order.
    pub fn active_entries(&mut self) -> Vec<(String, Value)> {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |deadline| deadline > now));
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replacing_an_override_reports_the_previous_owner() {
        let mut store = RuntimeOverrideStore::default();
        let path = "rate_limit.enabled".to_string();
        assert_eq!(store.insert(path.clone(), json!(false), "ops".into(), None), None);
        assert_eq!(
            store.insert(path.clone(), json!(true), "oncall".into(), None),
            Some("ops".to_string())
        );
        assert_eq!(store.active_entries(), vec![(path, json!(true))]);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let mut store = RuntimeOverrideStore::default();
        store.insert(
            "stats.recent_calls_capacity".into(),
            json!(8),
            "ops".into(),
            Some(Duration::ZERO),
        );
        assert!(store.active_entries().is_empty());
    }
}
