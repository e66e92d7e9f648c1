//! Event recording and delivery
//!
//! [`EventRecorder`] is the hinge between the two queues and the network:
//! it serializes events once, routes them either straight to the endpoint
//! or into the pending queue, assembles size-bounded batches, and moves
//! undeliverable immediate events into the failed queue for later retry.
//! Single-flight guards keep concurrent flush and retry calls from
//! double-sending.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::event::{AnalyticsEvent, EVENT_SEPARATOR};
use crate::network::{
    DeliveryClient, BATCH_REQUEST_RETRY_TIMES, BATCH_REQUEST_TIMEOUT, KEEP_ALIVE_SIZE_LIMIT,
    REQUEST_RETRY_TIMES, REQUEST_TIMEOUT,
};
use crate::storage::EventStore;

/// Upper bound, in bytes, on the serialized events included in one batch
/// request (excluding the wrapping brackets).
pub const MAX_REQUEST_EVENTS_SIZE: usize = 102_400;

/// Cut one batch from the raw pending queue (comma-joined serialized
/// events, no brackets).
///
/// Returns the bracket-wrapped JSON array payload and whether events
/// remain beyond it. The cut only ever happens on an event boundary; a
/// single event larger than the budget is sent whole rather than split.
pub fn assemble_batch(all_events: &str) -> (String, bool) {
    if all_events.is_empty() {
        return (String::new(), false);
    }
    if all_events.len() <= MAX_REQUEST_EVENTS_SIZE {
        return (format!("[{all_events}]"), false);
    }
    let Some(first_boundary) = all_events.find(EVENT_SEPARATOR) else {
        // One giant event. Oversized, but splitting JSON is worse.
        return (format!("[{all_events}]"), false);
    };
    if first_boundary > MAX_REQUEST_EVENTS_SIZE {
        return (format!("[{}]", &all_events[..first_boundary]), true);
    }
    // Truncate to the budget on a char boundary, then back up to the last
    // full event.
    let mut end = MAX_REQUEST_EVENTS_SIZE;
    while !all_events.is_char_boundary(end) {
        end -= 1;
    }
    let cut = all_events[..end]
        .rfind(EVENT_SEPARATOR)
        .unwrap_or(first_boundary);
    (format!("[{}]", &all_events[..cut]), true)
}

/// Records events and drives delivery. Shared behind an [`Arc`] so
/// immediate sends can run as detached tasks.
pub struct EventRecorder {
    store: Arc<EventStore>,
    context: Arc<RwLock<Context>>,
    client: DeliveryClient,
    bundle_sequence_id: AtomicU64,
    is_flushing_events: AtomicBool,
    is_sending_failed_events: AtomicBool,
    have_failed_events: AtomicBool,
}

impl EventRecorder {
    pub fn new(store: Arc<EventStore>, context: Arc<RwLock<Context>>) -> Self {
        let have_failed = !store.failed_events().is_empty();
        let sequence_id = store.bundle_sequence_id();
        EventRecorder {
            store,
            context,
            client: DeliveryClient::new(),
            bundle_sequence_id: AtomicU64::new(sequence_id),
            is_flushing_events: AtomicBool::new(false),
            is_sending_failed_events: AtomicBool::new(false),
            have_failed_events: AtomicBool::new(have_failed),
        }
    }

    pub fn has_failed_events(&self) -> bool {
        self.have_failed_events.load(Ordering::SeqCst)
    }

    /// Clone the shared context. Taken before any await so the lock is
    /// never held across a suspension point.
    fn snapshot(&self) -> Context {
        self.context
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Claim the sequence id for one delivery attempt. Every attempt gets
    /// a distinct id, successful or not, and the successor is persisted
    /// so restarts keep counting forward.
    fn next_sequence_id(&self) -> u64 {
        let id = self.bundle_sequence_id.fetch_add(1, Ordering::SeqCst);
        self.store.save_bundle_sequence_id(id + 1);
        id
    }

    /// Route one built event: immediate events (and everything in
    /// immediate mode) go straight out on a detached task; batch-mode
    /// events land in the pending queue. When the queue refuses the event
    /// it is sent immediately instead of being dropped.
    pub fn record(self: &Arc<Self>, event: AnalyticsEvent, is_immediate: bool) {
        let context = self.snapshot();
        if context.config.is_log_events {
            match serde_json::to_string_pretty(&event) {
                Ok(pretty) => debug!(event = %pretty, "recording event"),
                Err(_) => debug!(event_type = %event.event_type, "recording event"),
            }
        }
        let event_json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, event_type = %event.event_type, "failed to serialize event");
                return;
            }
        };
        let immediate_mode = context.config.send_mode == crate::config::SendMode::Immediate;
        if immediate_mode || is_immediate {
            self.spawn_immediate(event_json);
        } else if !self.store.save_event(&event_json) {
            warn!("pending queue full, sending event immediately");
            self.spawn_immediate(event_json);
        }
    }

    fn spawn_immediate(self: &Arc<Self>, event_json: String) {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            recorder.send_event_immediate(event_json).await;
        });
    }

    /// Deliver one event now; on failure park it in the failed queue. A
    /// success also drains the failed queue while the endpoint is known
    /// to be reachable.
    pub async fn send_event_immediate(&self, event_json: String) {
        let context = self.snapshot();
        let payload = format!("[{event_json}]");
        let sequence_id = self.next_sequence_id();
        let ok = self
            .client
            .send(
                &payload,
                &context,
                sequence_id,
                REQUEST_RETRY_TIMES,
                REQUEST_TIMEOUT,
            )
            .await;
        if ok {
            if self.have_failed_events.load(Ordering::SeqCst) {
                self.send_failed_events().await;
            }
        } else {
            self.store.save_failed_event(&event_json);
            self.have_failed_events.store(true, Ordering::SeqCst);
        }
    }

    /// Retry the failed queue as one batch. Single-flight: a second
    /// caller returns immediately while the first is in progress.
    pub async fn send_failed_events(&self) {
        if self
            .is_sending_failed_events
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let failed = self.store.failed_events();
        if !failed.is_empty() {
            let context = self.snapshot();
            let payload = format!("[{failed}]");
            let sequence_id = self.next_sequence_id();
            let ok = self
                .client
                .send(
                    &payload,
                    &context,
                    sequence_id,
                    REQUEST_RETRY_TIMES,
                    REQUEST_TIMEOUT,
                )
                .await;
            if ok {
                info!("failed events sent");
                self.store.clear_failed_events();
                self.have_failed_events.store(false, Ordering::SeqCst);
            }
        }
        self.is_sending_failed_events.store(false, Ordering::SeqCst);
    }

    /// Drain the pending queue batch by batch until it is empty or a
    /// batch fails. Single-flight; an overlapping call is a no-op.
    pub async fn flush_events(&self) {
        if self
            .is_flushing_events
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        loop {
            let all_events = self.store.all_events();
            let (payload, has_more) = assemble_batch(&all_events);
            if payload.is_empty() {
                break;
            }
            let context = self.snapshot();
            let sequence_id = self.next_sequence_id();
            let ok = self
                .client
                .send(
                    &payload,
                    &context,
                    sequence_id,
                    BATCH_REQUEST_RETRY_TIMES,
                    BATCH_REQUEST_TIMEOUT,
                )
                .await;
            if ok {
                debug!(bytes = payload.len(), "batch flushed");
                self.store.clear_sent_events(&payload);
            }
            if !(ok && has_more) {
                break;
            }
        }
        self.is_flushing_events.store(false, Ordering::SeqCst);
    }

    /// Last-chance delivery when the app goes to the background or shuts
    /// down. Small queues are sent inline and, on a final close, cleared
    /// after the attempt. Oversized queues are skipped entirely —
    /// teardown gives no time for a large transfer — and survive into
    /// the next launch, which retries them.
    pub async fn send_events_in_background(&self, is_window_closing: bool) {
        if self.have_failed_events.load(Ordering::SeqCst) {
            let failed = self.store.failed_events();
            if !failed.is_empty() && failed.len() < KEEP_ALIVE_SIZE_LIMIT {
                self.send_failed_events().await;
                if is_window_closing {
                    self.store.clear_failed_events();
                    self.have_failed_events.store(false, Ordering::SeqCst);
                }
            }
        }
        let batch_mode = {
            let context = self.snapshot();
            context.config.send_mode == crate::config::SendMode::Batch
        };
        if batch_mode {
            let pending = self.store.all_events();
            if !pending.is_empty() && pending.len() < KEEP_ALIVE_SIZE_LIMIT {
                self.flush_events().await;
                if is_window_closing {
                    self.store.clear_all_events();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, SendMode};
    use crate::context::DeviceInfo;

    fn event_of_size(name: &str, size: usize) -> String {
        let skeleton = format!("{{\"event_type\":\"{name}\",\"pad\":\"\"}}");
        let padding = size.saturating_sub(skeleton.len());
        format!(
            "{{\"event_type\":\"{name}\",\"pad\":\"{}\"}}",
            "x".repeat(padding)
        )
    }

    #[test]
    fn assemble_empty_queue() {
        assert_eq!(assemble_batch(""), (String::new(), false));
    }

    #[test]
    fn assemble_small_queue_is_one_batch() {
        let a = event_of_size("eventA", 100);
        let b = event_of_size("eventB", 100);
        let queue = format!("{a},{b}");
        let (payload, has_more) = assemble_batch(&queue);
        assert_eq!(payload, format!("[{queue}]"));
        assert!(!has_more);
    }

    #[test]
    fn assemble_cuts_on_event_boundary() {
        // A fits in the budget, B does not fit alongside it.
        let a = event_of_size("eventA", 100);
        let b = event_of_size("eventB", MAX_REQUEST_EVENTS_SIZE - 50);
        let queue = format!("{a},{b}");
        let (payload, has_more) = assemble_batch(&queue);
        assert_eq!(payload, format!("[{a}]"));
        assert!(has_more);

        let remaining = &queue[payload.len() - 1..];
        let (payload, has_more) = assemble_batch(remaining);
        assert_eq!(payload, format!("[{b}]"));
        assert!(!has_more);
    }

    #[test]
    fn assemble_sends_single_oversized_event_whole() {
        let big = event_of_size("bigEvent", MAX_REQUEST_EVENTS_SIZE + 500);
        let (payload, has_more) = assemble_batch(&big);
        assert_eq!(payload, format!("[{big}]"));
        assert!(!has_more);
    }

    #[test]
    fn assemble_oversized_head_goes_alone() {
        let big = event_of_size("bigEvent", MAX_REQUEST_EVENTS_SIZE + 500);
        let small = event_of_size("smallEvent", 100);
        let queue = format!("{big},{small}");
        let (payload, has_more) = assemble_batch(&queue);
        assert_eq!(payload, format!("[{big}]"));
        assert!(has_more);
    }

    #[test]
    fn assemble_never_exceeds_budget_when_divisible() {
        let events: Vec<String> = (0..30)
            .map(|i| event_of_size(&format!("event{i}"), 8_000))
            .collect();
        let queue = events.join(",");
        let mut remaining = queue.clone();
        let mut reassembled = Vec::new();
        loop {
            let (payload, has_more) = assemble_batch(&remaining);
            if payload.is_empty() {
                break;
            }
            let inner = &payload[1..payload.len() - 1];
            assert!(inner.len() <= MAX_REQUEST_EVENTS_SIZE);
            reassembled.push(inner.to_string());
            if !has_more {
                break;
            }
            remaining = remaining[inner.len() + 1..].to_string();
        }
        assert_eq!(reassembled.join(","), queue);
    }

    fn recorder_with_mode(mode: SendMode) -> Arc<EventRecorder> {
        let store = Arc::new(EventStore::in_memory());
        let mut config = Configuration::new("testApp", "http://127.0.0.1:9/collect");
        config.send_mode = mode;
        let context = Arc::new(RwLock::new(Context {
            device: DeviceInfo::default(),
            config,
            user_unique_id: "unique-id".to_string(),
            page: None,
        }));
        Arc::new(EventRecorder::new(store, context))
    }

    #[test]
    fn sequence_id_advances_per_attempt_and_persists() {
        let recorder = recorder_with_mode(SendMode::Batch);
        assert_eq!(recorder.next_sequence_id(), 1);
        assert_eq!(recorder.next_sequence_id(), 2);
        assert_eq!(recorder.next_sequence_id(), 3);
        assert_eq!(recorder.store.bundle_sequence_id(), 4);

        // A recorder built over the same store resumes from there.
        let resumed = EventRecorder::new(recorder.store.clone(), recorder.context.clone());
        assert_eq!(resumed.next_sequence_id(), 4);
    }

    #[tokio::test]
    async fn failed_immediate_send_lands_in_failed_queue() {
        // Endpoint is unroutable; the send must fail fast and park the
        // event.
        let recorder = recorder_with_mode(SendMode::Immediate);
        let event_json = event_of_size("testEvent", 100);
        recorder.send_event_immediate(event_json.clone()).await;
        assert!(recorder.has_failed_events());
        assert_eq!(recorder.store.failed_events(), event_json);
    }

    #[tokio::test]
    async fn flush_is_single_flight() {
        let recorder = recorder_with_mode(SendMode::Batch);
        let json = event_of_size("testEvent", 100);
        assert!(recorder.store.save_event(&json));

        // Hold the guard as an overlapping flush would, then verify the
        // second call returns without touching the queue.
        recorder.is_flushing_events.store(true, Ordering::SeqCst);
        recorder.flush_events().await;
        assert_eq!(recorder.store.all_events(), json);
        assert!(recorder.is_flushing_events.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn background_close_clears_small_queues_after_send_attempt() {
        // Endpoint is unreachable: the inline sends fail, the close
        // still clears the small queues.
        let recorder = recorder_with_mode(SendMode::Batch);
        let json = event_of_size("testEvent", 100);
        assert!(recorder.store.save_event(&json));
        recorder.store.save_failed_event(&json);
        recorder.have_failed_events.store(true, Ordering::SeqCst);

        recorder.send_events_in_background(true).await;
        assert!(recorder.store.all_events().is_empty());
        assert!(recorder.store.failed_events().is_empty());
        assert!(!recorder.has_failed_events());
    }

    #[tokio::test]
    async fn background_close_keeps_oversized_queues() {
        // Queues past the teardown send threshold are neither sent nor
        // cleared; the next launch picks them up.
        let recorder = recorder_with_mode(SendMode::Batch);
        let big = event_of_size("bigEvent", KEEP_ALIVE_SIZE_LIMIT + 10);
        assert!(recorder.store.save_event(&big));
        recorder.store.save_failed_event(&big);
        recorder.have_failed_events.store(true, Ordering::SeqCst);
        let sequence_before = recorder.store.bundle_sequence_id();

        recorder.send_events_in_background(true).await;
        assert_eq!(recorder.store.all_events(), big);
        assert_eq!(recorder.store.failed_events(), big);
        assert!(recorder.has_failed_events());
        // No delivery attempt was made for either queue.
        assert_eq!(recorder.store.bundle_sequence_id(), sequence_before);
    }

}
