//! # tracklet-core
//!
//! Core library for tracklet - a client-side analytics SDK.
//!
//! This library provides:
//! - Event recording with attribute/item validation
//! - Immediate and batch delivery with retry and a failed-event queue
//! - Session tracking driven by explicit lifecycle events
//! - Durable local buffering over SQLite (or in-memory) storage
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through three stages:
//! - **Record:** validate, enrich with session/user/device context, serialize once
//! - **Buffer:** append to the pending queue (batch mode) or dispatch right away
//! - **Deliver:** size-bounded batches over HTTP; failures park in the failed
//!   queue and are retried after the next success
//!
//! ## Example
//!
//! ```rust,no_run
//! use tracklet_core::{Configuration, DeviceInfo, SendMode, TrackEvent, Tracklet};
//! use tracklet_core::storage::SqliteStorage;
//!
//! # async fn run() -> tracklet_core::Result<()> {
//! let mut config = Configuration::new("myApp", "https://example.com/collect");
//! config.send_mode = SendMode::Batch;
//!
//! let storage = SqliteStorage::open(&Configuration::data_dir().join("events.db"))?;
//! let sdk = Tracklet::new(config, DeviceInfo::detect(), Box::new(storage))?;
//! sdk.init();
//!
//! sdk.record(TrackEvent::new("buttonClick").attribute("screen", "home"));
//! sdk.flush().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{ConfigUpdate, Configuration, SendMode};
pub use context::{Context, DeviceInfo, PageInfo};
pub use error::{Error, Result};
pub use event::{AnalyticsEvent, AttributeValue, Attributes, Item, TrackEvent};
pub use provider::{Diagnostics, Tracklet};
pub use session::LifecycleEvent;

// Public modules
pub mod builder;
pub mod check;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod logging;
pub mod network;
pub mod provider;
pub mod recorder;
pub mod scheduler;
pub mod session;
pub mod storage;
