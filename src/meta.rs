//! Response metadata, kept beside results rather than on them.
//!
//! Results are plain text ([`ResponseText`]), so timing and model details live
//! in a side table keyed by the result's allocation. Entries hold only a weak
//! reference and disappear once every clone of the result is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::model::ResponseText;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMeta {
    pub model: String,
    pub endpoint: Option<String>,
    pub timing: Timing,
    pub raw_response: Option<String>,
}

/// Metadata for a call that has started but not produced its result yet.
#[derive(Debug, Clone)]
pub struct PendingMeta {
    model: String,
    endpoint: Option<String>,
    start_time: DateTime<Utc>,
}

impl PendingMeta {
    pub fn start(model: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            model: model.into(),
            endpoint,
            start_time: Utc::now(),
        }
    }

    pub fn complete(self, raw_response: &str) -> ResponseMeta {
        let end_time = Utc::now();
        ResponseMeta {
            model: self.model,
            endpoint: self.endpoint,
            timing: Timing {
                start_time: self.start_time,
                end_time: Some(end_time),
                duration: Some((end_time - self.start_time).to_std().unwrap_or_default()),
            },
            raw_response: Some(raw_response.to_string()),
        }
    }
}

struct Entry {
    key: Weak<str>,
    meta: ResponseMeta,
}

/// Side table from result identity to [`ResponseMeta`].
#[derive(Default)]
pub struct MetaStore {
    entries: Mutex<HashMap<usize, Entry>>,
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `meta` to `text`. A result gets metadata once; later calls for
    /// the same result are ignored and return `false`.
    pub fn record(&self, text: &ResponseText, meta: ResponseMeta) -> bool {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.key.strong_count() > 0);

        let address = address_of(text.shared());
        if entries.contains_key(&address) {
            return false;
        }

        entries.insert(
            address,
            Entry {
                key: Arc::downgrade(text.shared()),
                meta,
            },
        );
        true
    }

    pub fn get(&self, text: &ResponseText) -> Option<ResponseMeta> {
        let entries = self.entries.lock();
        entries
            .get(&address_of(text.shared()))
            .filter(|entry| Weak::ptr_eq(&entry.key, &Arc::downgrade(text.shared())))
            .map(|entry| entry.meta.clone())
    }

    /// Number of results still alive that carry metadata.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.key.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("live_entries", &self.len())
            .finish()
    }
}

fn address_of(text: &Arc<str>) -> usize {
    Arc::as_ptr(text) as *const u8 as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_for(text: &str) -> ResponseMeta {
        PendingMeta::start("openai/gpt-4o", Some("https://example.test/chat".into())).complete(text)
    }

    #[test]
    fn test_complete_sets_timing_and_raw_response() {
        let meta = meta_for("done");
        assert_eq!(meta.model, "openai/gpt-4o");
        assert_eq!(meta.raw_response.as_deref(), Some("done"));
        assert!(meta.timing.end_time.unwrap() >= meta.timing.start_time);
        assert!(meta.timing.duration.is_some());
    }

    #[test]
    fn test_lookup_by_identity_not_value() {
        let store = MetaStore::new();
        let text = ResponseText::from("same".to_string());
        let twin = ResponseText::from("same".to_string());

        assert!(store.record(&text, meta_for("same")));
        assert!(store.get(&text.clone()).is_some());
        assert!(store.get(&twin).is_none());
    }

    #[test]
    fn test_first_record_wins() {
        let store = MetaStore::new();
        let text = ResponseText::from("x".to_string());

        assert!(store.record(&text, meta_for("first")));
        assert!(!store.record(&text, meta_for("second")));
        assert_eq!(
            store.get(&text).unwrap().raw_response.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_entries_released_with_result() {
        let store = MetaStore::new();
        let text = ResponseText::from("short-lived".to_string());
        store.record(&text, meta_for("short-lived"));
        assert_eq!(store.len(), 1);

        drop(text);
        assert!(store.is_empty());
    }
}
