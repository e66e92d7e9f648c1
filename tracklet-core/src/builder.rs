//! Assembles the final [`AnalyticsEvent`] from a caller's [`TrackEvent`],
//! the runtime context, and the current session
//!
//! Attribute and item validation happens here: anything rejected is
//! dropped and replaced with the in-band `_error_code`/`_error_message`
//! pair, so the event itself always goes through.

use chrono::Utc;
use uuid::Uuid;

use crate::check;
use crate::context::Context;
use crate::event::{
    error_code, reserved, AnalyticsEvent, Attributes, Item, TrackEvent, UserAttributes, PLATFORM,
    SDK_NAME, SDK_VERSION,
};
use crate::session::Session;
use crate::storage::EventStore;

/// Build a deliverable event.
///
/// `user_attributes` is the snapshot embedded under `user`; ordinary
/// events carry the simple subset, `_profile_set` the full one.
pub fn build_event(
    context: &Context,
    event: TrackEvent,
    user_attributes: UserAttributes,
    global_attributes: &Attributes,
    session: Option<&Session>,
    store: &EventStore,
) -> AnalyticsEvent {
    let mut attributes = checked_attributes(event.attributes, global_attributes);

    if let Some(session) = session {
        attributes.insert(
            reserved::SESSION_ID.to_string(),
            session.session_id.clone().into(),
        );
        attributes.insert(
            reserved::SESSION_START_TIMESTAMP.to_string(),
            session.start_time.into(),
        );
        attributes.insert(
            reserved::SESSION_DURATION.to_string(),
            session.duration().into(),
        );
        attributes.insert(
            reserved::SESSION_NUMBER.to_string(),
            i64::from(session.session_index).into(),
        );
    }
    if let Some(page) = &context.page {
        attributes.insert(reserved::PAGE_TITLE.to_string(), page.title.clone().into());
        attributes.insert(reserved::PAGE_URL.to_string(), page.url.clone().into());
    }

    let items = checked_items(event.items, &mut attributes);

    AnalyticsEvent {
        event_type: event.name,
        event_id: Uuid::new_v4().to_string(),
        device_id: store.device_id(),
        unique_id: context.user_unique_id.clone(),
        app_id: context.config.app_id.clone(),
        timestamp: Utc::now().timestamp_millis(),
        host_name: context.device.host_name.clone(),
        locale: context.device.locale.clone(),
        system_language: context.device.system_language.clone(),
        country_code: context.device.country_code.clone(),
        zone_offset: context.device.zone_offset,
        make: context.device.make.clone(),
        platform: PLATFORM.to_string(),
        sdk_name: SDK_NAME.to_string(),
        sdk_version: SDK_VERSION.to_string(),
        items,
        user: user_attributes,
        attributes,
    }
}

/// Fold custom attributes through validation, then overlay the global
/// attributes (globals win on key collision, matching the original).
fn checked_attributes(event_attributes: Attributes, global_attributes: &Attributes) -> Attributes {
    let mut checked = Attributes::new();
    for (name, value) in event_attributes {
        let current_number = checked.len() + global_attributes.len();
        let result = check::check_attribute(current_number, &name, &value);
        if result.is_ok() {
            checked.insert(name, value);
        } else {
            tracing::warn!(attribute = %name, code = result.error_code, "{}", result.error_message);
            checked.insert(
                reserved::ERROR_CODE.to_string(),
                result.error_code.into(),
            );
            checked.insert(
                reserved::ERROR_MESSAGE.to_string(),
                result.error_message.into(),
            );
        }
    }
    for (name, value) in global_attributes {
        checked.insert(name.clone(), value.clone());
    }
    checked
}

/// Validate items; rejected items are skipped and annotated on the event.
fn checked_items(items: Option<Vec<Item>>, attributes: &mut Attributes) -> Option<Vec<Item>> {
    let items = items?;
    let mut checked = Vec::new();
    for item in items {
        let result = check::check_item(checked.len(), &item);
        if result.error_code > error_code::NO_ERROR {
            tracing::warn!(code = result.error_code, "{}", result.error_message);
            attributes.insert(reserved::ERROR_CODE.to_string(), result.error_code.into());
            attributes.insert(
                reserved::ERROR_MESSAGE.to_string(),
                result.error_message.into(),
            );
        } else {
            checked.push(item);
        }
    }
    Some(checked)
}
