//! Metadata values and the per-object metadata cache.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A metadata value: either plain text or an id-reference to an element,
/// resolved lazily against the owner of the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MetaValue {
    Text(String),
    IdRef(String),
}

impl MetaValue {
    pub fn text(value: impl Into<String>) -> Self {
        MetaValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            MetaValue::IdRef(_) => None,
        }
    }

    pub fn as_idref(&self) -> Option<&str> {
        match self {
            MetaValue::IdRef(s) => Some(s),
            MetaValue::Text(_) => None,
        }
    }

    pub fn is_idref(&self) -> bool {
        matches!(self, MetaValue::IdRef(_))
    }

    /// The raw string, whatever the kind.
    pub fn as_str(&self) -> &str {
        match self {
            MetaValue::Text(s) | MetaValue::IdRef(s) => s,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

/// Read cache and pending writes for one object's metadata.
///
/// `None` values record a known absence (or a pending deletion).
#[derive(Debug, Default)]
pub(crate) struct MetaCache {
    values: HashMap<String, Option<MetaValue>>,
    dirty: BTreeMap<String, Option<MetaValue>>,
}

impl MetaCache {
    pub fn cached(&self, key: &str) -> Option<&Option<MetaValue>> {
        self.values.get(key)
    }

    /// Record a value read from the backend.
    pub fn remember(&mut self, key: &str, value: Option<MetaValue>) {
        self.values.insert(key.to_string(), value);
    }

    /// Record a local change, to be written by the next flush.
    pub fn set(&mut self, key: &str, value: Option<MetaValue>) {
        self.values.insert(key.to_string(), value.clone());
        self.dirty.insert(key.to_string(), value);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Write every pending change; failed keys stay pending.
    pub fn flush<E>(
        &mut self,
        mut write: impl FnMut(&str, Option<&MetaValue>) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut first_error = None;
        let pending = std::mem::take(&mut self.dirty);
        for (key, value) in pending {
            if let Err(e) = write(&key, value.as_ref()) {
                self.dirty.insert(key, value);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply pending changes on top of stored entries.
    pub fn overlay(&self, stored: Vec<(String, MetaValue)>) -> Vec<(String, MetaValue)> {
        let mut merged: BTreeMap<String, MetaValue> = stored.into_iter().collect();
        for (key, value) in &self.dirty {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_value_serde_shape() {
        let json = serde_json::to_string(&MetaValue::IdRef("t1".into())).unwrap();
        assert_eq!(json, r#"{"kind":"idref","value":"t1"}"#);
        let back: MetaValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_idref(), Some("t1"));
    }

    #[test]
    fn test_cache_tracks_pending_changes() {
        let mut cache = MetaCache::default();
        cache.remember("k1", None);
        assert_eq!(cache.cached("k1"), Some(&None));
        assert!(!cache.is_dirty());

        cache.set("k1", Some("v".into()));
        cache.set("k2", Some("w".into()));
        assert!(cache.is_dirty());

        let merged = cache.overlay(vec![("k0".into(), "x".into()), ("k2".into(), "old".into())]);
        assert_eq!(
            merged,
            vec![
                ("k0".to_string(), MetaValue::text("x")),
                ("k1".to_string(), MetaValue::text("v")),
                ("k2".to_string(), MetaValue::text("w")),
            ]
        );
    }

    #[test]
    fn test_flush_keeps_failed_keys() {
        let mut cache = MetaCache::default();
        cache.set("good", Some("1".into()));
        cache.set("bad", None);
        let result = cache.flush(|key, _| if key == "bad" { Err(()) } else { Ok(()) });
        assert!(result.is_err());
        assert!(cache.is_dirty());
        let mut written = Vec::new();
        cache
            .flush(|key, _| {
                written.push(key.to_string());
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(written, vec!["bad".to_string()]);
        assert!(!cache.is_dirty());
    }
}
