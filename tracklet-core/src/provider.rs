//! SDK facade
//!
//! [`Tracklet`] wires the store, session tracker, recorder and flush
//! scheduler together and exposes the host-facing API: record events,
//! manage user identity and attributes, react to lifecycle transitions,
//! and flush on demand. Each instance is self-contained; hosts that want
//! one shared instance keep it in an `Arc` themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::builder;
use crate::check;
use crate::config::{ConfigUpdate, Configuration, SendMode};
use crate::context::{Context, DeviceInfo, PageInfo};
use crate::event::{preset, reserved, Attributes, TrackEvent, UserAttribute, UserAttributes};
use crate::recorder::EventRecorder;
use crate::scheduler::FlushScheduler;
use crate::session::{LifecycleEvent, PlannedEvent, SessionTracker};
use crate::storage::{EventStore, KeyValueStorage};
use crate::Result;

/// A snapshot of the SDK's persisted state, for status reporting.
#[derive(Debug, Serialize)]
pub struct Diagnostics {
    pub device_id: String,
    pub user_unique_id: String,
    pub pending_bytes: usize,
    pub failed_bytes: usize,
    pub bundle_sequence_id: u64,
}

/// The analytics SDK.
pub struct Tracklet {
    store: Arc<EventStore>,
    context: Arc<RwLock<Context>>,
    recorder: Arc<EventRecorder>,
    session_tracker: Mutex<SessionTracker>,
    scheduler: Mutex<FlushScheduler>,
    global_attributes: RwLock<Attributes>,
    initialized: AtomicBool,
}

impl Tracklet {
    /// Build an SDK instance over the given storage backend. Call
    /// [`init`](Self::init) afterwards to start sessions and timers.
    pub fn new(
        config: Configuration,
        device: DeviceInfo,
        storage: Box<dyn KeyValueStorage>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(EventStore::new(storage));
        let user_unique_id = store.user_unique_id();
        let context = Arc::new(RwLock::new(Context {
            device,
            config,
            user_unique_id,
            page: None,
        }));
        let recorder = Arc::new(EventRecorder::new(store.clone(), context.clone()));
        Ok(Tracklet {
            session_tracker: Mutex::new(SessionTracker::new(store.clone())),
            store,
            context,
            recorder,
            scheduler: Mutex::new(FlushScheduler::new()),
            global_attributes: RwLock::new(Attributes::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Start the SDK: restore or create the session, record startup
    /// preset events, retry any leftover failed events, and in batch mode
    /// arm the flush timer. Returns `false` (and does nothing) if already
    /// initialized.
    pub fn init(&self) -> bool {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("already initialized, ignoring");
            return false;
        }
        let (unique_id, timeout, track_app_start, send_mode, interval) = {
            let context = self.read_context();
            (
                context.user_unique_id.clone(),
                context.config.session_timeout(),
                context.config.is_track_app_start_events,
                context.config.send_mode,
                context.config.send_events_interval(),
            )
        };
        let planned = self
            .lock_tracker()
            .handle_init(&unique_id, timeout, track_app_start);
        self.record_planned(planned);

        if self.recorder.has_failed_events() {
            let recorder = self.recorder.clone();
            tokio::spawn(async move { recorder.send_failed_events().await });
        }
        if send_mode == SendMode::Batch {
            let recorder = self.recorder.clone();
            tokio::spawn(async move { recorder.flush_events().await });
            self.lock_scheduler().start(self.recorder.clone(), interval);
        }
        info!("initialized");
        true
    }

    /// Record an event through the configured delivery mode. Events with
    /// invalid names are logged and dropped.
    pub fn record(&self, event: TrackEvent) {
        self.record_event(event, false);
    }

    /// Record an event that bypasses batching and goes out now.
    pub fn record_immediate(&self, event: TrackEvent) {
        self.record_event(event, true);
    }

    fn record_event(&self, event: TrackEvent, is_immediate: bool) {
        let result = check::check_event_name(&event.name);
        if !result.is_ok() {
            warn!(
                event_name = %event.name,
                code = result.error_code,
                "{}",
                result.error_message
            );
            return;
        }
        let built = self.build(event, self.store.simple_user_attributes());
        self.recorder.record(built, is_immediate);
    }

    /// Set or clear the application-level user id.
    ///
    /// Switching to a user seen before restores that user's unique id and
    /// first-touch timestamp; the first identity claim keeps the current
    /// unique id; a brand-new subsequent user gets a fresh one. Either
    /// way a `_profile_set` event with the full attribute snapshot is
    /// recorded.
    pub fn set_user_id(&self, user_id: Option<&str>) {
        let mut attributes = self.store.all_user_attributes();
        let previous = attributes.get(reserved::USER_ID).and_then(|a| {
            if let crate::event::AttributeValue::String(s) = &a.value {
                Some(s.clone())
            } else {
                None
            }
        });
        let now = chrono::Utc::now().timestamp_millis();
        match user_id {
            None => {
                attributes.remove(reserved::USER_ID);
            }
            Some(id) if previous.as_deref() == Some(id) => {}
            Some(id) => {
                let info = match self.store.user_info_from_mapping(id) {
                    Some(info) => info,
                    None => {
                        let info = if previous.is_none() {
                            // First identity claim maps to the existing
                            // anonymous identity.
                            crate::storage::StoredUserInfo {
                                user_unique_id: self.read_context().user_unique_id.clone(),
                                user_first_touch_timestamp: attributes
                                    .get(reserved::USER_FIRST_TOUCH_TIMESTAMP)
                                    .and_then(|a| match a.value {
                                        crate::event::AttributeValue::Integer(t) => Some(t),
                                        _ => None,
                                    })
                                    .unwrap_or(now),
                            }
                        } else {
                            crate::storage::StoredUserInfo {
                                user_unique_id: Uuid::new_v4().to_string(),
                                user_first_touch_timestamp: now,
                            }
                        };
                        self.store.save_user_info_to_mapping(id, &info);
                        info
                    }
                };
                attributes = UserAttributes::new();
                attributes.insert(
                    reserved::USER_ID.to_string(),
                    UserAttribute {
                        value: id.into(),
                        set_timestamp: now,
                    },
                );
                attributes.insert(
                    reserved::USER_FIRST_TOUCH_TIMESTAMP.to_string(),
                    UserAttribute {
                        value: info.user_first_touch_timestamp.into(),
                        set_timestamp: info.user_first_touch_timestamp,
                    },
                );
                self.store.set_user_unique_id(&info.user_unique_id);
                self.write_context().user_unique_id = info.user_unique_id;
            }
        }
        self.store.update_user_attributes(&attributes);
        self.record_profile_set();
    }

    /// Merge custom user attributes into the stored profile. Invalid
    /// attributes are logged and skipped; the rest are stamped with the
    /// current time and a `_profile_set` event carries the full snapshot.
    pub fn set_user_attributes(&self, attributes: Attributes) {
        let mut stored = self.store.all_user_attributes();
        let now = chrono::Utc::now().timestamp_millis();
        for (name, value) in attributes {
            let result = check::check_user_attribute(stored.len(), &name, &value);
            if result.is_ok() {
                stored.insert(
                    name,
                    UserAttribute {
                        value,
                        set_timestamp: now,
                    },
                );
            } else {
                warn!(attribute = %name, code = result.error_code, "{}", result.error_message);
            }
        }
        self.store.update_user_attributes(&stored);
        self.record_profile_set();
    }

    /// Set attributes stamped onto every subsequent event. Invalid
    /// attributes are logged and skipped.
    pub fn set_global_attributes(&self, attributes: Attributes) {
        let mut globals = self
            .global_attributes
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for (name, value) in attributes {
            let result = check::check_attribute(globals.len(), &name, &value);
            if result.is_ok() {
                globals.insert(name, value);
            } else {
                warn!(attribute = %name, code = result.error_code, "{}", result.error_message);
            }
        }
    }

    /// Set the page/screen in view; it is stamped onto subsequent events
    /// as the reserved page attributes.
    pub fn set_page(&self, page: PageInfo) {
        self.store.save_previous_page(&page.title, &page.url);
        self.write_context().page = Some(page);
    }

    /// Apply a runtime configuration change. A send-mode or interval
    /// change rearms (or stops) the flush timer.
    pub fn update_configure(&self, update: ConfigUpdate) {
        let (rearm, send_mode, interval) = {
            let mut context = self.write_context();
            let rearm = update.apply(&mut context.config);
            (
                rearm,
                context.config.send_mode,
                context.config.send_events_interval(),
            )
        };
        if rearm && self.initialized.load(Ordering::SeqCst) {
            let mut scheduler = self.lock_scheduler();
            scheduler.stop();
            if send_mode == SendMode::Batch {
                let recorder = self.recorder.clone();
                tokio::spawn(async move { recorder.flush_events().await });
                scheduler.start(self.recorder.clone(), interval);
            }
        }
    }

    /// Feed a host lifecycle transition to the SDK. Background and close
    /// run last-chance delivery before returning.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Foreground => {
                let (unique_id, timeout, track_app_start) = {
                    let context = self.read_context();
                    (
                        context.user_unique_id.clone(),
                        context.config.session_timeout(),
                        context.config.is_track_app_start_events,
                    )
                };
                let planned =
                    self.lock_tracker()
                        .on_foreground(&unique_id, timeout, track_app_start);
                self.record_planned(planned);
            }
            LifecycleEvent::Background | LifecycleEvent::Close => {
                let track_app_end = self.read_context().config.is_track_app_end_events;
                let planned = self.lock_tracker().on_background(track_app_end);
                self.record_planned(planned);
                let is_closing = event == LifecycleEvent::Close;
                self.recorder.send_events_in_background(is_closing).await;
            }
        }
    }

    /// Flush the pending queue now.
    pub async fn flush(&self) {
        self.recorder.flush_events().await;
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            device_id: self.store.device_id(),
            user_unique_id: self.read_context().user_unique_id.clone(),
            pending_bytes: self.store.all_events().len(),
            failed_bytes: self.store.failed_events().len(),
            bundle_sequence_id: self.store.bundle_sequence_id(),
        }
    }

    fn record_profile_set(&self) {
        let built = self.build(
            TrackEvent::new(preset::PROFILE_SET),
            self.store.all_user_attributes(),
        );
        self.recorder.record(built, false);
    }

    fn record_planned(&self, planned: Vec<PlannedEvent>) {
        for item in planned {
            let built = self.build(item.event, self.store.simple_user_attributes());
            self.recorder.record(built, item.immediate);
        }
    }

    fn build(&self, event: TrackEvent, user: UserAttributes) -> crate::event::AnalyticsEvent {
        let context = self.read_context().clone();
        let tracker = self.lock_tracker();
        let globals = self
            .global_attributes
            .read()
            .unwrap_or_else(|e| e.into_inner());
        builder::build_event(
            &context,
            event,
            user,
            &globals,
            tracker.session(),
            &self.store,
        )
    }

    fn read_context(&self) -> std::sync::RwLockReadGuard<'_, Context> {
        self.context.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_context(&self) -> std::sync::RwLockWriteGuard<'_, Context> {
        self.context.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tracker(&self) -> MutexGuard<'_, SessionTracker> {
        self.session_tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, FlushScheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AttributeValue, EVENT_SEPARATOR};
    use crate::storage::MemoryStorage;

    fn batch_sdk() -> Tracklet {
        let mut config = Configuration::new("testApp", "http://127.0.0.1:9/collect");
        config.send_mode = SendMode::Batch;
        config.is_track_app_start_events = false;
        config.is_track_app_end_events = false;
        Tracklet::new(config, DeviceInfo::default(), Box::new(MemoryStorage::new())).unwrap()
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let sdk = batch_sdk();
        assert!(sdk.init());
        let device_id = sdk.diagnostics().device_id;
        assert!(!sdk.init());
        // A refused second init leaves identity untouched.
        assert_eq!(sdk.diagnostics().device_id, device_id);
    }

    #[tokio::test]
    async fn recorded_events_land_in_pending_queue() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.record(TrackEvent::new("testEvent").attribute("color", "red"));
        let pending = sdk.store.all_events();
        assert!(pending.contains("\"event_type\":\"_first_open\""));
        assert!(pending.contains("\"event_type\":\"testEvent\""));
        assert!(pending.contains(EVENT_SEPARATOR));
    }

    #[tokio::test]
    async fn invalid_event_name_is_dropped() {
        let sdk = batch_sdk();
        sdk.init();
        let before = sdk.store.all_events();
        sdk.record(TrackEvent::new("1badName"));
        assert_eq!(sdk.store.all_events(), before);
    }

    #[tokio::test]
    async fn set_user_id_switches_and_restores_identity() {
        let sdk = batch_sdk();
        sdk.init();
        let original = sdk.diagnostics().user_unique_id;

        // First claim keeps the anonymous unique id.
        sdk.set_user_id(Some("userA"));
        assert_eq!(sdk.diagnostics().user_unique_id, original);

        // A different user gets a fresh unique id.
        sdk.set_user_id(Some("userB"));
        let user_b = sdk.diagnostics().user_unique_id;
        assert_ne!(user_b, original);

        // Switching back restores the mapped identity.
        sdk.set_user_id(Some("userA"));
        assert_eq!(sdk.diagnostics().user_unique_id, original);
        sdk.set_user_id(Some("userB"));
        assert_eq!(sdk.diagnostics().user_unique_id, user_b);
    }

    #[tokio::test]
    async fn clearing_user_id_removes_the_attribute() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.set_user_id(Some("userA"));
        assert!(sdk
            .store
            .all_user_attributes()
            .contains_key(reserved::USER_ID));
        sdk.set_user_id(None);
        assert!(!sdk
            .store
            .all_user_attributes()
            .contains_key(reserved::USER_ID));
    }

    #[tokio::test]
    async fn set_user_attributes_records_profile_set() {
        let sdk = batch_sdk();
        sdk.init();
        let mut attributes = Attributes::new();
        attributes.insert("plan".to_string(), "pro".into());
        attributes.insert("1bad".to_string(), "skipped".into());
        sdk.set_user_attributes(attributes);

        let stored = sdk.store.all_user_attributes();
        assert!(stored.contains_key("plan"));
        assert!(!stored.contains_key("1bad"));
        assert!(sdk
            .store
            .all_events()
            .contains("\"event_type\":\"_profile_set\""));
    }

    #[tokio::test]
    async fn global_attributes_appear_on_events() {
        let sdk = batch_sdk();
        sdk.init();
        let mut globals = Attributes::new();
        globals.insert("channel".to_string(), "cli".into());
        sdk.set_global_attributes(globals);
        sdk.record(TrackEvent::new("testEvent"));
        assert!(sdk.store.all_events().contains("\"channel\":\"cli\""));
    }

    #[tokio::test]
    async fn page_attributes_appear_on_events() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.set_page(PageInfo {
            title: "Checkout".to_string(),
            url: "app://checkout".to_string(),
        });
        sdk.record(TrackEvent::new("testEvent"));
        let pending = sdk.store.all_events();
        assert!(pending.contains("\"_page_title\":\"Checkout\""));
        assert!(pending.contains("\"_page_url\":\"app://checkout\""));
    }

    #[tokio::test]
    async fn update_configure_changes_logging_flag() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.update_configure(ConfigUpdate {
            is_log_events: Some(true),
            ..Default::default()
        });
        assert!(sdk.read_context().config.is_log_events);
    }

    #[tokio::test]
    async fn oversized_pending_queue_survives_close() {
        let sdk = batch_sdk();
        sdk.init();
        // Push the queue past the inline teardown send threshold.
        let padding = "x".repeat(1000);
        while sdk.store.all_events().len() < crate::network::KEEP_ALIVE_SIZE_LIMIT {
            sdk.record(TrackEvent::new("paddedEvent").attribute("pad", padding.clone()));
        }
        let queue = sdk.store.all_events();
        sdk.handle_lifecycle(LifecycleEvent::Close).await;
        // Too big to send during teardown, so it is kept for the next
        // launch instead of being dropped.
        assert_eq!(sdk.store.all_events(), queue);
    }

    #[tokio::test]
    async fn record_immediate_bypasses_the_pending_queue_in_batch_mode() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.record_immediate(TrackEvent::new("urgentEvent"));
        assert!(!sdk.store.all_events().contains("urgentEvent"));

        // The detached send runs and, with the endpoint unreachable,
        // parks the event in the failed queue.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert!(sdk
            .store
            .failed_events()
            .contains("\"event_type\":\"urgentEvent\""));
    }

    #[tokio::test]
    async fn full_pending_queue_falls_back_to_immediate_dispatch() {
        let sdk = batch_sdk();
        let filler = format!(
            "{{\"event_type\":\"fillerEvent\",\"pad\":\"{}\"}}",
            "x".repeat(crate::storage::MAX_BATCH_EVENTS_SIZE - 40)
        );
        assert!(sdk.store.save_event(&filler));
        assert!(!sdk.store.save_event("{\"event_type\":\"noRoom\"}"));

        sdk.record(TrackEvent::new("overflowEvent"));
        assert!(!sdk.store.all_events().contains("overflowEvent"));

        // Instead of being dropped, the refused event went out as an
        // immediate send and parked in the failed queue.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert!(sdk
            .store
            .failed_events()
            .contains("\"event_type\":\"overflowEvent\""));
    }

    #[tokio::test]
    async fn session_attributes_are_stamped() {
        let sdk = batch_sdk();
        sdk.init();
        sdk.record(TrackEvent::new("testEvent"));
        let pending = sdk.store.all_events();
        assert!(pending.contains("\"_session_id\":"));
        assert!(pending.contains("\"_session_number\":1"));
    }

    #[test]
    fn new_rejects_invalid_configuration() {
        let config = Configuration::new("", "http://127.0.0.1:9/collect");
        let result = Tracklet::new(config, DeviceInfo::default(), Box::new(MemoryStorage::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn user_attribute_value_is_typed() {
        let sdk = batch_sdk();
        sdk.init();
        let mut attributes = Attributes::new();
        attributes.insert("age".to_string(), AttributeValue::Integer(30));
        sdk.set_user_attributes(attributes);
        let stored = sdk.store.all_user_attributes();
        assert_eq!(stored["age"].value, AttributeValue::Integer(30));
    }
}
