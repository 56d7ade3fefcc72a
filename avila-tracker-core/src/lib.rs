//! # avila-tracker-core
//!
//! Core library for avila-tracker - a client-side event tracker for Avila Analytics.
//!
//! This library provides:
//! - Client and session identity with injected storage
//! - Environment context collection (user agent, language, screen, device class)
//! - Envelope construction and best-effort delivery to the collect endpoint
//! - Auto-instrumentation of page views, link clicks, downloads, form submits and scroll depth
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! PageSignal -> AutoTracker -> EventBuilder (+ IdentityStore, Environment) -> DeliveryClient
//! ```
//!
//! The host page substrate is never touched directly. Storage, environment,
//! clock and transport are capabilities handed to [`Tracker::builder`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use avila_tracker_core::{Params, Tracker, TrackerConfig};
//!
//! # async fn run() -> avila_tracker_core::Result<()> {
//! let tracker = Tracker::builder(TrackerConfig::for_site("SITE1")).build()?;
//! tracker.attach();
//! tracker.track("newsletter_signup", Params::new());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use autotrack::{Element, PageSignal, ScrollMetrics};
pub use config::{Config, TrackerConfig};
pub use context::{Environment, PageInfo, ReadyState, StaticEnvironment};
pub use delivery::{DeliveryHandle, DeliveryOutcome, HttpTransport, MemoryTransport, Transport};
pub use ecommerce::{EcommerceAction, EcommerceData, Item};
pub use error::{Error, Result};
pub use events::{Event, EventEnvelope, EventKind, Params};
pub use identity::{Clock, IdentityStore, ManualClock, SystemClock};
pub use storage::{MemoryStorage, SqliteStorage, Storage, StorageScope, UnavailableStorage};
pub use tracker::{Tracker, TrackerBuilder};

// Public modules
pub mod autotrack;
pub mod builder;
pub mod config;
pub mod context;
pub mod delivery;
pub mod ecommerce;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod storage;
pub mod tracker;
