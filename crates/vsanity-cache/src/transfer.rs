//! Server-to-client hand-off of fetched entries.
//!
//! On the server, every binding that prefetched its data records the
//! settled entry here. The collected state is serialized into the page and
//! used on the client to restore entries without refetching them.
//!
//! Each entry is encoded as a compact tuple `[value, status, updated_at_ms, error]`.
//! Missing trailing slots fall back to defaults and extra slots are ignored,
//! so state produced by older or newer writers can still be read.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::entry::CacheEntry;
use crate::error::FetchError;
use crate::status::FetchStatus;

/// Name of the browser global the rendered state is assigned to.
pub const TRANSFER_STATE_GLOBAL: &str = "__VSANITY_STATE__";

/// Serialized form of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedEntry {
    /// Value as JSON.
    pub value: Value,
    /// Status at the time of capture.
    pub status: FetchStatus,
    /// Time of the last state transition.
    pub updated_at: Option<DateTime<Utc>>,
    /// Error from the last failed fetch.
    pub error: Option<FetchError>,
}

impl HydratedEntry {
    /// Create an entry captured now.
    pub fn new(value: Value, status: FetchStatus) -> Self {
        Self {
            value,
            status,
            updated_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Capture a cache entry.
    pub fn from_entry<T: Serialize>(entry: &CacheEntry<T>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            value: serde_json::to_value(&entry.value)?,
            status: entry.status,
            updated_at: Some(entry.updated_at),
            error: entry.error.clone(),
        })
    }

    /// Restore a cache entry of type `T`.
    pub fn into_entry<T: DeserializeOwned>(self) -> Result<CacheEntry<T>, FetchError> {
        let value = serde_json::from_value(self.value)?;
        Ok(CacheEntry::restored(
            value,
            self.status,
            self.updated_at.unwrap_or_else(Utc::now),
            self.error,
        ))
    }
}

impl Serialize for HydratedEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.value)?;
        tuple.serialize_element(&self.status)?;
        tuple.serialize_element(&self.updated_at.map(|t| t.timestamp_millis()))?;
        tuple.serialize_element(&self.error)?;
        tuple.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorSlot {
    Structured(FetchError),
    Message(String),
    Other(IgnoredAny),
}

impl From<ErrorSlot> for FetchError {
    fn from(slot: ErrorSlot) -> Self {
        match slot {
            ErrorSlot::Structured(error) => error,
            ErrorSlot::Message(message) => FetchError::Rejected(message),
            ErrorSlot::Other(_) => FetchError::Unknown,
        }
    }
}

struct HydratedEntryVisitor;

impl<'de> Visitor<'de> for HydratedEntryVisitor {
    type Value = HydratedEntry;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array [value, status, updated_at, error]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<HydratedEntry, A::Error> {
        let value = seq.next_element::<Value>()?.unwrap_or(Value::Null);
        let status = seq.next_element::<Option<FetchStatus>>()?.flatten();
        let millis = seq.next_element::<Option<i64>>()?.flatten();
        let error = seq.next_element::<Option<ErrorSlot>>()?.flatten();
        while seq.next_element::<IgnoredAny>()?.is_some() {}

        let updated_at = match millis {
            Some(ms) => Some(
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| A::Error::custom(format!("timestamp out of range: {ms}")))?,
            ),
            None => None,
        };

        Ok(HydratedEntry {
            value,
            status: status.unwrap_or_default(),
            updated_at,
            error: error.map(FetchError::from),
        })
    }
}

impl<'de> Deserialize<'de> for HydratedEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(HydratedEntryVisitor)
    }
}

/// Entries captured during server rendering, keyed by cache key.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct TransferState {
    entries: Arc<Mutex<BTreeMap<String, HydratedEntry>>>,
}

impl TransferState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, HydratedEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an entry, replacing any earlier capture of the same key.
    pub fn insert(&self, key: impl Into<String>, entry: HydratedEntry) {
        self.entries().insert(key.into(), entry);
    }

    /// Get the captured entry for `key`.
    pub fn get(&self, key: &str) -> Option<HydratedEntry> {
        self.entries().get(key).cloned()
    }

    /// Captured keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    /// Number of captured entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Serialize as a JSON object of key to entry tuple.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&*self.entries())
    }

    /// Parse state produced by [`TransferState::to_json`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, HydratedEntry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    /// Render an inline script assigning the state to the browser global.
    ///
    /// `<` is escaped so the payload cannot close the script element.
    pub fn to_script(&self) -> Result<String, serde_json::Error> {
        let json = self.to_json()?.replace('<', "\\u003c");
        Ok(format!(
            "<script>window.{}={};</script>",
            TRANSFER_STATE_GLOBAL, json
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // === HydratedEntry Tests ===

    #[test]
    fn test_entry_serializes_as_tuple() {
        let mut entry = HydratedEntry::new(json!("cherry"), FetchStatus::ServerLoaded);
        entry.updated_at = DateTime::from_timestamp_millis(1_700_000_000_000);

        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            encoded,
            json!(["cherry", "server-loaded", 1_700_000_000_000i64, null])
        );
    }

    #[test]
    fn test_entry_tolerates_missing_and_extra_slots() {
        let short: HydratedEntry = serde_json::from_str(r#"["x"]"#).unwrap();
        assert_eq!(short.value, json!("x"));
        assert_eq!(short.status, FetchStatus::Initialised);
        assert!(short.updated_at.is_none());

        let long: HydratedEntry =
            serde_json::from_str(r#"[1, "client loaded", null, null, "extra", 7]"#).unwrap();
        assert_eq!(long.status, FetchStatus::ClientLoaded);
    }

    #[test]
    fn test_entry_error_slot_is_lenient() {
        let structured: HydratedEntry =
            serde_json::from_str(r#"[null, "error", null, {"kind":"decode","message":"bad"}]"#)
                .unwrap();
        assert_eq!(structured.error, Some(FetchError::decode("bad")));

        let message: HydratedEntry =
            serde_json::from_str(r#"[null, "error", null, "timeout"]"#).unwrap();
        assert_eq!(message.error, Some(FetchError::rejected("timeout")));

        let opaque: HydratedEntry =
            serde_json::from_str(r#"[null, "error", null, {"code": 500}]"#).unwrap();
        assert_eq!(opaque.error, Some(FetchError::Unknown));
    }

    #[test]
    fn test_into_entry_decodes_value() {
        let entry: CacheEntry<Vec<u32>> = HydratedEntry::new(json!([1, 2]), FetchStatus::ServerLoaded)
            .into_entry()
            .unwrap();

        assert_eq!(entry.value, vec![1, 2]);
        assert_eq!(entry.status, FetchStatus::ServerLoaded);
    }

    #[test]
    fn test_into_entry_type_mismatch() {
        let result = HydratedEntry::new(json!("text"), FetchStatus::ServerLoaded)
            .into_entry::<u32>();

        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    // === TransferState Tests ===

    #[test]
    fn test_state_json_round_trip() {
        let state = TransferState::new();
        state.insert("k1", HydratedEntry::new(json!("cherry"), FetchStatus::ServerLoaded));

        let restored = TransferState::from_json(&state.to_json().unwrap()).unwrap();

        assert_eq!(restored.keys(), vec!["k1".to_string()]);
        assert_eq!(restored.get("k1").unwrap().value, json!("cherry"));
    }

    #[test]
    fn test_state_script_escapes_markup() {
        let state = TransferState::new();
        state.insert(
            "html",
            HydratedEntry::new(json!("</script><b>"), FetchStatus::ServerLoaded),
        );

        let script = state.to_script().unwrap();

        assert!(script.starts_with("<script>window.__VSANITY_STATE__="));
        assert!(script.ends_with(";</script>"));
        assert_eq!(script.matches("</script>").count(), 1);
        assert!(script.contains("\\u003c/script>"));
    }

    #[test]
    fn test_state_handles_are_shared() {
        let state = TransferState::new();
        let handle = state.clone();
        handle.insert("k", HydratedEntry::new(json!(null), FetchStatus::Error));

        assert_eq!(state.len(), 1);
        assert!(!state.is_empty());
    }
}
