//! Session lifecycle
//!
//! A [`Session`] is one continuous engagement period. It is created when
//! no prior session exists, reactivated when the app returns to the
//! foreground within the session timeout, and superseded (index + 1) when
//! the pause gap exceeds it. [`SessionTracker`] owns the current session
//! and translates explicit [`LifecycleEvent`]s from the host into session
//! transitions plus the preset events to record — there are no implicit
//! environment listeners here.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::{preset, reserved, Attributes, TrackEvent};
use crate::storage::EventStore;

/// How many trailing characters of the user unique id prefix the
/// session id.
const MAX_UNIQUE_ID_SUFFIX: usize = 8;

/// Host-driven lifecycle transitions, replacing the original's DOM
/// visibility and unload listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app/page became visible again.
    Foreground,
    /// The app/page was hidden but may come back.
    Background,
    /// The app/page is going away for good.
    Close,
}

/// One engagement period, serializable to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_index: u32,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<i64>,
    #[serde(default)]
    pub is_recorded: bool,
}

impl Session {
    /// Create a fresh session for the given user.
    pub fn create(unique_id: &str, session_index: u32) -> Self {
        Session {
            session_id: Self::session_id_for(unique_id),
            session_index,
            start_time: chrono::Utc::now().timestamp_millis(),
            pause_time: None,
            is_recorded: false,
        }
    }

    /// A session that has neither been paused nor had its start recorded.
    pub fn is_new(&self) -> bool {
        self.pause_time.is_none() && !self.is_recorded
    }

    /// Milliseconds since the session started.
    pub fn duration(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.start_time
    }

    pub fn pause(&mut self) {
        self.pause_time = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Resolve the session to use right now: the given (or stored) session
    /// if it is still within `timeout` of its pause, otherwise a successor
    /// with the next index.
    pub fn current(
        store: &EventStore,
        timeout: Duration,
        unique_id: &str,
        previous: Option<Session>,
    ) -> Session {
        let session = previous.or_else(|| Self::restore(store));
        match session {
            Some(session) => match session.pause_time {
                None => session,
                Some(pause_time)
                    if chrono::Utc::now().timestamp_millis() - pause_time
                        < timeout.as_millis() as i64 =>
                {
                    session
                }
                Some(_) => {
                    debug!(
                        previous_index = session.session_index,
                        "session timed out, starting a new one"
                    );
                    Session::create(unique_id, session.session_index + 1)
                }
            },
            None => Session::create(unique_id, 1),
        }
    }

    pub fn restore(store: &EventStore) -> Option<Session> {
        let json = store.session_json()?;
        serde_json::from_str(&json).ok()
    }

    pub fn save(&self, store: &EventStore) {
        if let Ok(json) = serde_json::to_string(self) {
            store.save_session_json(&json);
        }
    }

    fn session_id_for(unique_id: &str) -> String {
        let start = unique_id.len().saturating_sub(MAX_UNIQUE_ID_SUFFIX);
        let suffix = unique_id.get(start..).unwrap_or(unique_id);
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%3f");
        format!("{suffix}-{stamp}")
    }
}

/// A preset event the tracker wants recorded, and whether it must bypass
/// batching.
#[derive(Debug)]
pub struct PlannedEvent {
    pub event: TrackEvent,
    pub immediate: bool,
}

impl PlannedEvent {
    fn buffered(event: TrackEvent) -> Self {
        PlannedEvent {
            event,
            immediate: false,
        }
    }

    fn immediate(event: TrackEvent) -> Self {
        PlannedEvent {
            event,
            immediate: true,
        }
    }
}

/// Owns the current session and decides which preset events each
/// lifecycle transition produces. The caller records the returned events;
/// the tracker itself never touches the network.
pub struct SessionTracker {
    store: Arc<EventStore>,
    session: Option<Session>,
}

impl SessionTracker {
    pub fn new(store: Arc<EventStore>) -> Self {
        SessionTracker {
            store,
            session: None,
        }
    }

    /// Read access for event construction.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// SDK startup: restore or create the session, emit `_first_open` on
    /// the very first launch, then run the first foreground transition.
    pub fn handle_init(
        &mut self,
        unique_id: &str,
        timeout: Duration,
        track_app_start: bool,
    ) -> Vec<PlannedEvent> {
        let mut planned = Vec::new();
        self.session = Some(Session::current(&self.store, timeout, unique_id, None));
        if self.store.is_first_open() {
            planned.push(PlannedEvent::buffered(TrackEvent::new(preset::FIRST_OPEN)));
            self.store.complete_first_open();
        }
        planned.extend(self.foreground_transition(true, track_app_start));
        planned
    }

    /// Foreground transition after a background period.
    pub fn on_foreground(
        &mut self,
        unique_id: &str,
        timeout: Duration,
        track_app_start: bool,
    ) -> Vec<PlannedEvent> {
        debug!("lifecycle foreground");
        self.session = Some(Session::current(
            &self.store,
            timeout,
            unique_id,
            self.session.take(),
        ));
        self.foreground_transition(false, track_app_start)
    }

    fn foreground_transition(
        &mut self,
        is_first_time: bool,
        track_app_start: bool,
    ) -> Vec<PlannedEvent> {
        let mut planned = Vec::new();
        if let Some(session) = self.session.as_mut() {
            if session.is_new() {
                self.store.clear_page_info();
                planned.push(PlannedEvent::buffered(TrackEvent::new(
                    preset::SESSION_START,
                )));
                session.is_recorded = true;
            }
        }
        if track_app_start {
            let mut attributes = Attributes::new();
            attributes.insert(reserved::IS_FIRST_TIME.to_string(), is_first_time.into());
            planned.push(PlannedEvent::buffered(TrackEvent {
                name: preset::APP_START.to_string(),
                attributes,
                items: None,
            }));
        }
        planned
    }

    /// Background transition: pause and persist the session; `_app_end`
    /// goes out immediately since batch delivery may never get another
    /// cycle.
    pub fn on_background(&mut self, track_app_end: bool) -> Vec<PlannedEvent> {
        debug!("lifecycle background");
        if let Some(session) = self.session.as_mut() {
            session.pause();
            session.save(&self.store);
        }
        if track_app_end {
            vec![PlannedEvent::immediate(TrackEvent::new(preset::APP_END))]
        } else {
            Vec::new()
        }
    }
}
