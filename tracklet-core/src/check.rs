//! Event and attribute validation
//!
//! Pure functions: each returns an [`EventError`] describing why a name,
//! attribute or item was rejected. Rejected attributes are dropped and the
//! error is written back onto the event as `_error_code`/`_error_message`
//! reserved attributes; the event itself is never refused.

use crate::event::{error_code, limit, AttributeValue, Item};

/// Outcome of a validation check. `error_code` is
/// [`error_code::NO_ERROR`] when the input is acceptable.
#[derive(Debug, Clone, PartialEq)]
pub struct EventError {
    pub error_code: i64,
    pub error_message: String,
}

impl EventError {
    pub fn ok() -> Self {
        EventError {
            error_code: error_code::NO_ERROR,
            error_message: String::new(),
        }
    }

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        EventError {
            error_code: code,
            error_message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == error_code::NO_ERROR
    }
}

/// Names must start with a letter or underscore and contain only
/// letters, digits and underscores.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn check_event_name(name: &str) -> EventError {
    if !is_valid_name(name) {
        EventError::new(
            error_code::EVENT_NAME_INVALID,
            format!(
                "event name: {} is invalid, name must start with a letter or underscore \
                 and contain only letters, digits and underscores",
                name
            ),
        )
    } else if name.len() > limit::MAX_EVENT_TYPE_LENGTH {
        EventError::new(
            error_code::EVENT_NAME_LENGTH_EXCEED,
            format!(
                "event name: {} exceeds the max length of {}",
                name,
                limit::MAX_EVENT_TYPE_LENGTH
            ),
        )
    } else {
        EventError::ok()
    }
}

/// Check one event attribute against the running attribute count.
pub fn check_attribute(current_number: usize, name: &str, value: &AttributeValue) -> EventError {
    if current_number >= limit::MAX_NUM_OF_ATTRIBUTES {
        return EventError::new(
            error_code::ATTRIBUTE_SIZE_EXCEED,
            format!(
                "attribute: {} dropped, the number of attributes exceeds {}",
                name,
                limit::MAX_NUM_OF_ATTRIBUTES
            ),
        );
    }
    if name.len() > limit::MAX_LENGTH_OF_NAME {
        return EventError::new(
            error_code::ATTRIBUTE_NAME_LENGTH_EXCEED,
            format!(
                "attribute name: {} exceeds the max length of {}",
                name,
                limit::MAX_LENGTH_OF_NAME
            ),
        );
    }
    if !is_valid_name(name) {
        return EventError::new(
            error_code::ATTRIBUTE_NAME_INVALID,
            format!("attribute name: {} is invalid", name),
        );
    }
    if value.len() > limit::MAX_LENGTH_OF_VALUE {
        return EventError::new(
            error_code::ATTRIBUTE_VALUE_LENGTH_EXCEED,
            format!(
                "attribute value for {} exceeds the max length of {}",
                name,
                limit::MAX_LENGTH_OF_VALUE
            ),
        );
    }
    EventError::ok()
}

/// Check one user attribute against the running user-attribute count.
pub fn check_user_attribute(
    current_number: usize,
    name: &str,
    value: &AttributeValue,
) -> EventError {
    if current_number >= limit::MAX_NUM_OF_USER_ATTRIBUTES {
        return EventError::new(
            error_code::USER_ATTRIBUTE_SIZE_EXCEED,
            format!(
                "user attribute: {} dropped, the number of user attributes exceeds {}",
                name,
                limit::MAX_NUM_OF_USER_ATTRIBUTES
            ),
        );
    }
    if name.len() > limit::MAX_LENGTH_OF_NAME {
        return EventError::new(
            error_code::USER_ATTRIBUTE_NAME_LENGTH_EXCEED,
            format!(
                "user attribute name: {} exceeds the max length of {}",
                name,
                limit::MAX_LENGTH_OF_NAME
            ),
        );
    }
    if !is_valid_name(name) {
        return EventError::new(
            error_code::USER_ATTRIBUTE_NAME_INVALID,
            format!("user attribute name: {} is invalid", name),
        );
    }
    if value.len() > limit::MAX_LENGTH_OF_USER_VALUE {
        return EventError::new(
            error_code::USER_ATTRIBUTE_VALUE_LENGTH_EXCEED,
            format!(
                "user attribute value for {} exceeds the max length of {}",
                name,
                limit::MAX_LENGTH_OF_USER_VALUE
            ),
        );
    }
    EventError::ok()
}

/// Check one item against the running item count.
pub fn check_item(current_number: usize, item: &Item) -> EventError {
    if current_number >= limit::MAX_NUM_OF_ITEMS {
        return EventError::new(
            error_code::ITEM_SIZE_EXCEED,
            format!(
                "item dropped, the number of items exceeds {}",
                limit::MAX_NUM_OF_ITEMS
            ),
        );
    }
    if item.custom_attributes.len() > limit::MAX_NUM_OF_CUSTOM_ITEM_ATTRIBUTES {
        return EventError::new(
            error_code::ITEM_CUSTOM_ATTRIBUTE_SIZE_EXCEED,
            format!(
                "item dropped, the number of custom item attributes exceeds {}",
                limit::MAX_NUM_OF_CUSTOM_ITEM_ATTRIBUTES
            ),
        );
    }
    for (name, value) in &item.custom_attributes {
        if name.len() > limit::MAX_LENGTH_OF_NAME || value.len() > limit::MAX_LENGTH_OF_ITEM_VALUE
        {
            return EventError::new(
                error_code::ITEM_VALUE_LENGTH_EXCEED,
                format!(
                    "item attribute {} exceeds the max key length of {} or value length of {}",
                    name,
                    limit::MAX_LENGTH_OF_NAME,
                    limit::MAX_LENGTH_OF_ITEM_VALUE
                ),
            );
        }
    }
    for (field, len) in [
        ("id", item.id.as_deref().map_or(0, str::len)),
        ("name", item.name.as_deref().map_or(0, str::len)),
        ("category", item.category.as_deref().map_or(0, str::len)),
    ] {
        if len > limit::MAX_LENGTH_OF_ITEM_VALUE {
            return EventError::new(
                error_code::ITEM_VALUE_LENGTH_EXCEED,
                format!(
                    "item {} exceeds the max value length of {}",
                    field,
                    limit::MAX_LENGTH_OF_ITEM_VALUE
                ),
            );
        }
    }
    EventError::ok()
}
