use std::collections::BTreeMap;

use appsearch_core_types::AppSearchError;

/// Per-item outcome of a batch call. One failing item never aborts the others.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchResult<K: Ord, V> {
    pub successes: BTreeMap<K, V>,
    pub failures: BTreeMap<K, AppSearchError>,
}

impl<K: Ord, V> Default for BatchResult<K, V> {
    fn default() -> Self {
        Self {
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> BatchResult<K, V> {
    pub fn succeed(&mut self, key: K, value: V) {
        self.successes.insert(key, value);
    }

    pub fn fail(&mut self, key: K, error: AppSearchError) {
        self.failures.insert(key, error);
    }

    pub fn record(&mut self, key: K, outcome: Result<V, AppSearchError>) {
        match outcome {
            Ok(value) => self.succeed(key, value),
            Err(error) => self.fail(key, error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
