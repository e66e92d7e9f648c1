//! SDK state on top of the raw key-value store
//!
//! The pending queues use the append-friendly encoding from the original
//! wire design: serialized events joined with `,` and no surrounding
//! brackets, so appending is string concatenation and a reader only has to
//! wrap the whole string in `[`/`]` before parsing. Every operation here
//! fails soft — a broken storage backend reads as empty and refuses writes,
//! it never raises past this boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{reserved, UserAttribute, UserAttributes, EVENT_SEPARATOR, EVENT_START};

use super::kv::{KeyValueStorage, MemoryStorage};

/// Capacity ceiling for the normal pending queue, in bytes.
pub const MAX_BATCH_EVENTS_SIZE: usize = 1024 * 1024;

/// Capacity ceiling for the failed-event queue, in bytes.
pub const MAX_FAILED_EVENTS_SIZE: usize = 512 * 1024;

mod keys {
    pub const DEVICE_ID: &str = "tracklet/device_id";
    pub const USER_UNIQUE_ID: &str = "tracklet/user_unique_id";
    pub const USER_ATTRIBUTES: &str = "tracklet/user_attributes";
    pub const USER_ID_MAPPING: &str = "tracklet/user_id_mapping";
    pub const SESSION: &str = "tracklet/session";
    pub const BUNDLE_SEQUENCE_ID: &str = "tracklet/bundle_sequence_id";
    pub const EVENTS: &str = "tracklet/events";
    pub const FAILED_EVENTS: &str = "tracklet/failed_events";
    pub const PREVIOUS_PAGE_TITLE: &str = "tracklet/previous_page_title";
    pub const PREVIOUS_PAGE_URL: &str = "tracklet/previous_page_url";
    pub const IS_FIRST_OPEN: &str = "tracklet/is_first_open";

    pub const ALL: &[&str] = &[
        DEVICE_ID,
        USER_UNIQUE_ID,
        USER_ATTRIBUTES,
        USER_ID_MAPPING,
        SESSION,
        BUNDLE_SEQUENCE_ID,
        EVENTS,
        FAILED_EVENTS,
        PREVIOUS_PAGE_TITLE,
        PREVIOUS_PAGE_URL,
        IS_FIRST_OPEN,
    ];
}

/// Identity remembered per application user id, so switching back to a
/// known user restores the same unique id and first-touch timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUserInfo {
    pub user_unique_id: String,
    pub user_first_touch_timestamp: i64,
}

/// The SDK's persisted state: queues, identity, session, sequence id.
pub struct EventStore {
    storage: Box<dyn KeyValueStorage>,
}

impl EventStore {
    pub fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        EventStore { storage }
    }

    /// An ephemeral store; state lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    fn get_string(&self, key: &str) -> String {
        match self.storage.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => String::new(),
            Err(e) => {
                warn!(key, error = %e, "storage read failed, treating as empty");
                String::new()
            }
        }
    }

    fn set_string(&self, key: &str, value: &str) -> bool {
        match self.storage.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "storage write failed");
                false
            }
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            warn!(key, error = %e, "storage remove failed");
        }
    }

    // ---- identity ----

    /// Stable per-installation device id, created on first access.
    pub fn device_id(&self) -> String {
        let existing = self.get_string(keys::DEVICE_ID);
        if !existing.is_empty() {
            return existing;
        }
        let id = Uuid::new_v4().to_string();
        self.set_string(keys::DEVICE_ID, &id);
        id
    }

    /// Current user's unique id; creating it also stamps the user's
    /// first-touch timestamp into the user attributes.
    pub fn user_unique_id(&self) -> String {
        let existing = self.get_string(keys::USER_UNIQUE_ID);
        if !existing.is_empty() {
            return existing;
        }
        let id = Uuid::new_v4().to_string();
        self.set_string(keys::USER_UNIQUE_ID, &id);
        let now = chrono::Utc::now().timestamp_millis();
        let mut attributes = self.all_user_attributes();
        attributes.insert(
            reserved::USER_FIRST_TOUCH_TIMESTAMP.to_string(),
            UserAttribute {
                value: now.into(),
                set_timestamp: now,
            },
        );
        self.update_user_attributes(&attributes);
        id
    }

    pub fn set_user_unique_id(&self, id: &str) {
        self.set_string(keys::USER_UNIQUE_ID, id);
    }

    pub fn all_user_attributes(&self) -> UserAttributes {
        let raw = self.get_string(keys::USER_ATTRIBUTES);
        if raw.is_empty() {
            return UserAttributes::new();
        }
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "stored user attributes are corrupt, resetting");
            UserAttributes::new()
        })
    }

    pub fn update_user_attributes(&self, attributes: &UserAttributes) {
        match serde_json::to_string(attributes) {
            Ok(json) => {
                self.set_string(keys::USER_ATTRIBUTES, &json);
            }
            Err(e) => warn!(error = %e, "failed to serialize user attributes"),
        }
    }

    /// The subset of user attributes embedded in ordinary events.
    pub fn simple_user_attributes(&self) -> UserAttributes {
        self.all_user_attributes()
            .into_iter()
            .filter(|(name, _)| {
                name == reserved::USER_ID || name == reserved::USER_FIRST_TOUCH_TIMESTAMP
            })
            .collect()
    }

    pub fn user_info_from_mapping(&self, user_id: &str) -> Option<StoredUserInfo> {
        let raw = self.get_string(keys::USER_ID_MAPPING);
        if raw.is_empty() {
            return None;
        }
        let mapping: HashMap<String, StoredUserInfo> = serde_json::from_str(&raw).ok()?;
        mapping.get(user_id).cloned()
    }

    pub fn save_user_info_to_mapping(&self, user_id: &str, info: &StoredUserInfo) {
        let raw = self.get_string(keys::USER_ID_MAPPING);
        let mut mapping: HashMap<String, StoredUserInfo> = if raw.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&raw).unwrap_or_default()
        };
        mapping.insert(user_id.to_string(), info.clone());
        if let Ok(json) = serde_json::to_string(&mapping) {
            self.set_string(keys::USER_ID_MAPPING, &json);
        }
    }

    // ---- session / sequence ----

    pub fn session_json(&self) -> Option<String> {
        let raw = self.get_string(keys::SESSION);
        if raw.is_empty() {
            None
        } else {
            Some(raw)
        }
    }

    pub fn save_session_json(&self, json: &str) {
        self.set_string(keys::SESSION, json);
    }

    /// Persisted bundle sequence id; starts at 1.
    pub fn bundle_sequence_id(&self) -> u64 {
        self.get_string(keys::BUNDLE_SEQUENCE_ID)
            .parse()
            .unwrap_or(1)
    }

    pub fn save_bundle_sequence_id(&self, id: u64) {
        self.set_string(keys::BUNDLE_SEQUENCE_ID, &id.to_string());
    }

    // ---- pending queues ----

    /// Append a serialized event to the normal queue.
    ///
    /// Returns `false` without mutating when the append would exceed
    /// [`MAX_BATCH_EVENTS_SIZE`]; the caller falls back to immediate
    /// dispatch instead of losing the event.
    pub fn save_event(&self, event_json: &str) -> bool {
        debug_assert!(event_json.starts_with(EVENT_START));
        let queue = self.get_string(keys::EVENTS);
        let appended_len = if queue.is_empty() {
            event_json.len()
        } else {
            queue.len() + 1 + event_json.len()
        };
        if appended_len > MAX_BATCH_EVENTS_SIZE {
            debug!(
                queue_len = queue.len(),
                event_len = event_json.len(),
                "event queue full, refusing append"
            );
            return false;
        }
        let updated = if queue.is_empty() {
            event_json.to_string()
        } else {
            format!("{queue},{event_json}")
        };
        self.set_string(keys::EVENTS, &updated)
    }

    /// Append a serialized event to the failed queue, evicting oldest
    /// complete events until it fits. An event larger than the queue
    /// capacity is dropped outright.
    pub fn save_failed_event(&self, event_json: &str) {
        debug_assert!(event_json.starts_with(EVENT_START));
        if event_json.len() > MAX_FAILED_EVENTS_SIZE {
            warn!(
                event_len = event_json.len(),
                "failed event exceeds queue capacity, dropping"
            );
            return;
        }
        let mut queue = self.get_string(keys::FAILED_EVENTS);
        while !queue.is_empty() && queue.len() + 1 + event_json.len() > MAX_FAILED_EVENTS_SIZE {
            match queue.find(EVENT_SEPARATOR) {
                Some(comma) => {
                    debug!("failed queue full, evicting oldest event");
                    queue.drain(..=comma);
                }
                None => queue.clear(),
            }
        }
        let updated = if queue.is_empty() {
            event_json.to_string()
        } else {
            format!("{queue},{event_json}")
        };
        self.set_string(keys::FAILED_EVENTS, &updated);
    }

    /// Raw normal-queue content; wrap in `[`/`]` before parsing.
    pub fn all_events(&self) -> String {
        self.get_string(keys::EVENTS)
    }

    /// Raw failed-queue content; wrap in `[`/`]` before parsing.
    pub fn failed_events(&self) -> String {
        self.get_string(keys::FAILED_EVENTS)
    }

    /// Remove exactly the events contained in a previously assembled batch
    /// payload from the head of the normal queue. The payload must be the
    /// bracketed form produced by the batch assembler from this queue.
    pub fn clear_sent_events(&self, sent_payload: &str) {
        let inner = match sent_payload
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
        {
            Some(inner) if !inner.is_empty() => inner,
            _ => return,
        };
        let queue = self.get_string(keys::EVENTS);
        if queue == inner {
            self.remove(keys::EVENTS);
            return;
        }
        match queue.strip_prefix(inner).and_then(|r| r.strip_prefix(',')) {
            Some(remainder) => {
                self.set_string(keys::EVENTS, remainder);
            }
            None => warn!("sent batch is not a prefix of the stored queue, leaving queue as is"),
        }
    }

    pub fn clear_all_events(&self) {
        self.remove(keys::EVENTS);
    }

    pub fn clear_failed_events(&self) {
        self.remove(keys::FAILED_EVENTS);
    }

    // ---- page info / first open ----

    pub fn previous_page_title(&self) -> String {
        self.get_string(keys::PREVIOUS_PAGE_TITLE)
    }

    pub fn previous_page_url(&self) -> String {
        self.get_string(keys::PREVIOUS_PAGE_URL)
    }

    pub fn save_previous_page(&self, title: &str, url: &str) {
        self.set_string(keys::PREVIOUS_PAGE_TITLE, title);
        self.set_string(keys::PREVIOUS_PAGE_URL, url);
    }

    pub fn clear_page_info(&self) {
        self.remove(keys::PREVIOUS_PAGE_TITLE);
        self.remove(keys::PREVIOUS_PAGE_URL);
    }

    pub fn is_first_open(&self) -> bool {
        self.get_string(keys::IS_FIRST_OPEN) != "false"
    }

    pub fn complete_first_open(&self) {
        self.set_string(keys::IS_FIRST_OPEN, "false");
    }

    /// Drop every persisted key. Test support and data-reset flows.
    pub fn clear_all(&self) {
        for key in keys::ALL {
            self.remove(key);
        }
    }
}
