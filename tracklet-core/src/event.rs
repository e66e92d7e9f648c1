//! Wire data model for analytics events
//!
//! [`AnalyticsEvent`] is the record that crosses the network and the
//! pending queues. `event_type` must stay the first declared field: the
//! queue layer and the batch assembler rely on every serialized event
//! starting with `{"event_type":` to find record boundaries inside the
//! concatenated queue string (see [`EVENT_SEPARATOR`]).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Scalar value accepted for event, item and user attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl AttributeValue {
    /// Length of the value as it counts against the per-value limits.
    pub fn len(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Bool(_) => 0,
            AttributeValue::Integer(_) | AttributeValue::Number(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Integer(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Number(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Attribute map attached to events and items.
pub type Attributes = HashMap<String, AttributeValue>;

/// A transacted entity attached to an event (product, article, ...).
///
/// Well-known fields are optional; anything else goes through
/// `custom_attributes` and is flattened into the serialized item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(flatten)]
    pub custom_attributes: Attributes,
}

/// A user attribute value with the time it was set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAttribute {
    pub value: AttributeValue,
    pub set_timestamp: i64,
}

/// Snapshot of the current user's attributes, keyed by attribute name.
pub type UserAttributes = HashMap<String, UserAttribute>;

/// The immutable event record delivered to the collection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    // Keep first: queue boundary detection depends on it.
    pub event_type: String,
    pub event_id: String,
    pub device_id: String,
    pub unique_id: String,
    pub app_id: String,
    pub timestamp: i64,
    pub host_name: String,
    pub locale: String,
    pub system_language: String,
    pub country_code: String,
    pub zone_offset: i32,
    pub make: String,
    pub platform: String,
    pub sdk_name: String,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
    pub user: UserAttributes,
    pub attributes: Attributes,
}

/// The caller-facing description of an event to record.
#[derive(Debug, Clone, Default)]
pub struct TrackEvent {
    pub name: String,
    pub attributes: Attributes,
    pub items: Option<Vec<Item>>,
}

impl TrackEvent {
    pub fn new(name: impl Into<String>) -> Self {
        TrackEvent {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn item(mut self, item: Item) -> Self {
        self.items.get_or_insert_with(Vec::new).push(item);
        self
    }
}

/// Events the SDK records on the application's behalf.
pub mod preset {
    pub const FIRST_OPEN: &str = "_first_open";
    pub const SESSION_START: &str = "_session_start";
    pub const APP_START: &str = "_app_start";
    pub const APP_END: &str = "_app_end";
    pub const PROFILE_SET: &str = "_profile_set";
}

/// Attribute names reserved by the SDK.
pub mod reserved {
    pub const USER_ID: &str = "_user_id";
    pub const USER_FIRST_TOUCH_TIMESTAMP: &str = "_user_first_touch_timestamp";
    pub const SESSION_ID: &str = "_session_id";
    pub const SESSION_START_TIMESTAMP: &str = "_session_start_timestamp";
    pub const SESSION_DURATION: &str = "_session_duration";
    pub const SESSION_NUMBER: &str = "_session_number";
    pub const PAGE_TITLE: &str = "_page_title";
    pub const PAGE_URL: &str = "_page_url";
    pub const IS_FIRST_TIME: &str = "_is_first_time";
    pub const ERROR_CODE: &str = "_error_code";
    pub const ERROR_MESSAGE: &str = "_error_message";
}

/// In-band validation error codes (attached as reserved attributes, the
/// event itself is never dropped).
pub mod error_code {
    pub const NO_ERROR: i64 = 0;
    pub const EVENT_NAME_INVALID: i64 = 1001;
    pub const EVENT_NAME_LENGTH_EXCEED: i64 = 1002;
    pub const ATTRIBUTE_NAME_LENGTH_EXCEED: i64 = 2001;
    pub const ATTRIBUTE_NAME_INVALID: i64 = 2002;
    pub const ATTRIBUTE_VALUE_LENGTH_EXCEED: i64 = 2003;
    pub const ATTRIBUTE_SIZE_EXCEED: i64 = 2004;
    pub const USER_ATTRIBUTE_SIZE_EXCEED: i64 = 3001;
    pub const USER_ATTRIBUTE_NAME_LENGTH_EXCEED: i64 = 3002;
    pub const USER_ATTRIBUTE_NAME_INVALID: i64 = 3003;
    pub const USER_ATTRIBUTE_VALUE_LENGTH_EXCEED: i64 = 3004;
    pub const ITEM_SIZE_EXCEED: i64 = 4001;
    pub const ITEM_VALUE_LENGTH_EXCEED: i64 = 4002;
    pub const ITEM_CUSTOM_ATTRIBUTE_SIZE_EXCEED: i64 = 4003;
}

/// Size limits applied during validation.
pub mod limit {
    pub const MAX_EVENT_TYPE_LENGTH: usize = 50;
    pub const MAX_NUM_OF_ATTRIBUTES: usize = 500;
    pub const MAX_LENGTH_OF_NAME: usize = 50;
    pub const MAX_LENGTH_OF_VALUE: usize = 1024;
    pub const MAX_NUM_OF_ITEMS: usize = 100;
    pub const MAX_LENGTH_OF_ITEM_VALUE: usize = 256;
    pub const MAX_NUM_OF_CUSTOM_ITEM_ATTRIBUTES: usize = 10;
    pub const MAX_NUM_OF_USER_ATTRIBUTES: usize = 100;
    pub const MAX_LENGTH_OF_USER_VALUE: usize = 256;
}

/// The opening bytes of every serialized event.
pub const EVENT_START: &str = "{\"event_type\":";

/// Boundary between two serialized events in a pending queue or a batch
/// payload. Because `event_type` is the first serialized field, this
/// sequence cannot occur inside a single event except at a nested object
/// that would itself be a full event, which the scalar attribute model
/// rules out.
pub const EVENT_SEPARATOR: &str = ",{\"event_type\":";

pub const SDK_NAME: &str = "tracklet";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PLATFORM: &str = "Rust";
