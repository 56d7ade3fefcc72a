//! The tracker: public tracking calls plus auto-instrumentation wiring
//!
//! A [`Tracker`] owns one page's worth of state. Host code calls
//! [`Tracker::attach`] once (the moment the script would run on the page),
//! forwards DOM signals to [`Tracker::handle_signal`], and uses the manual
//! calls for business events.
//!
//! No call here returns an error or panics on behalf of the host: missing
//! configuration, storage trouble and transport failures are all absorbed.
//! Calls that send return a [`DeliveryHandle`] that callers are free to
//! drop.

use std::sync::Arc;

use crate::autotrack::{AutoTracker, Debouncer, PageSignal, Reaction, ScrollThresholds, SCROLL_DEBOUNCE};
use crate::builder::EventBuilder;
use crate::config::TrackerConfig;
use crate::context::{Environment, StaticEnvironment};
use crate::delivery::{
    DeliveryClient, DeliveryHandle, DeliveryOutcome, DeliverySnapshot, HttpTransport, Transport,
};
use crate::ecommerce::{EcommerceAction, EcommerceData};
use crate::error::Result;
use crate::events::{Event, EventKind, Params};
use crate::identity::{Clock, IdentityStore, SystemClock};
use crate::storage::{MemoryStorage, Storage};

/// Client-side event tracker
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    config: TrackerConfig,
    identity: Arc<IdentityStore>,
    environment: Arc<dyn Environment>,
    builder: EventBuilder,
    delivery: DeliveryClient,
    auto: AutoTracker,
    scroll_debounce: Debouncer<Vec<DeliveryHandle>>,
}

/// Builder for [`Tracker`]; any capability left unset gets a default
pub struct TrackerBuilder {
    config: TrackerConfig,
    storage: Option<Arc<dyn Storage>>,
    environment: Option<Arc<dyn Environment>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TrackerBuilder {
    /// Defaults to [`MemoryStorage`]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to [`StaticEnvironment::default`]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Defaults to [`HttpTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the tracker. Fails only if the default HTTP client cannot be created.
    pub fn build(self) -> Result<Tracker> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::from_config(&self.config)?),
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(StaticEnvironment::default()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let config = self.config;
        let identity = Arc::new(IdentityStore::new(storage, clock.clone(), config.debug));
        let builder = EventBuilder::new(
            config.measurement_id().map(str::to_string),
            config.debug,
            identity.clone(),
            environment.clone(),
            clock,
        );
        let delivery = DeliveryClient::new(&config, transport);
        let auto = AutoTracker::new(config.auto_track);

        if config.debug {
            tracing::info!(
                endpoint = %config.endpoint,
                measurement_id = ?config.measurement_id(),
                auto_track = config.auto_track,
                "Avila Analytics initialized"
            );
        }

        Ok(Tracker {
            inner: Arc::new(Inner {
                config,
                identity,
                environment,
                builder,
                delivery,
                auto,
                scroll_debounce: Debouncer::new(SCROLL_DEBOUNCE),
            }),
        })
    }
}

impl Tracker {
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            config,
            storage: None,
            environment: None,
            transport: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    // ============================================
    // Auto-instrumentation
    // ============================================

    /// Start auto-instrumentation on the current page.
    ///
    /// Emits the page view right away if the document has finished loading,
    /// otherwise on the next [`PageSignal::Load`]. Does nothing when
    /// `auto_track` is off or the tracker is already attached.
    pub fn attach(&self) -> Option<DeliveryHandle> {
        let kind = self.inner.auto.attach(self.inner.environment.as_ref())?;
        self.inner.emit(Event::new(kind))
    }

    /// Feed one DOM/lifecycle signal through auto-instrumentation.
    ///
    /// Scroll signals are debounced; their events are sent when scrolling
    /// settles and are not part of the returned handles (see
    /// [`Tracker::settle_scroll`]).
    pub fn handle_signal(&self, signal: &PageSignal) -> Vec<DeliveryHandle> {
        match self
            .inner
            .auto
            .on_signal(signal, self.inner.environment.as_ref())
        {
            Reaction::Emit(kinds) => kinds
                .into_iter()
                .filter_map(|kind| self.inner.emit(Event::new(kind)))
                .collect(),
            Reaction::SampleLater(metrics) => {
                let inner = self.inner.clone();
                self.inner
                    .scroll_debounce
                    .schedule(move || inner.sample_scroll(&metrics))
                    .unwrap_or_default()
            }
            Reaction::Ignore => Vec::new(),
        }
    }

    /// Wait for a pending scroll sample and the deliveries it started
    pub async fn settle_scroll(&self) -> Vec<DeliveryOutcome> {
        let handles = self.inner.scroll_debounce.settle().await.unwrap_or_default();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.outcome().await);
        }
        outcomes
    }

    /// Scroll thresholds fired on this page so far
    pub fn scroll_thresholds(&self) -> ScrollThresholds {
        self.inner.auto.thresholds()
    }

    // ============================================
    // Manual tracking
    // ============================================

    /// Custom event with caller params
    pub fn track(&self, name: &str, params: Params) -> Option<DeliveryHandle> {
        self.inner.emit(Event::with_params(
            EventKind::Custom {
                name: name.to_string(),
            },
            params,
        ))
    }

    /// Page view for the current document. Never deduplicated.
    pub fn track_page_view(&self) -> Option<DeliveryHandle> {
        let kind = crate::autotrack::page_view(self.inner.environment.as_ref());
        self.inner.emit(Event::new(kind))
    }

    /// Event of type `event_type` with `data` spread into the payload
    pub fn track_ecommerce(&self, event_type: &str, data: Params) -> Option<DeliveryHandle> {
        self.inner.emit(Event::new(EventKind::Ecommerce {
            event_type: event_type.to_string(),
            data,
        }))
    }

    /// Typed form of [`Tracker::track_ecommerce`]
    pub fn track_commerce(
        &self,
        action: EcommerceAction,
        data: &EcommerceData,
    ) -> Option<DeliveryHandle> {
        self.track_ecommerce(action.as_str(), data.to_params())
    }

    /// Persist a user id. Not added to events automatically.
    pub fn set_user_id(&self, user_id: &str) {
        self.inner.identity.set_user_id(user_id);
    }

    pub fn get_user_id(&self) -> Option<String> {
        self.inner.identity.get_user_id()
    }

    // ============================================
    // Introspection
    // ============================================

    pub fn client_id(&self) -> String {
        self.inner.identity.get_client_id()
    }

    /// Current session id; counts as session activity
    pub fn session_id(&self) -> String {
        self.inner.identity.get_session_id()
    }

    pub fn delivery_stats(&self) -> DeliverySnapshot {
        self.inner.delivery.stats()
    }
}

impl Inner {
    /// Build and dispatch; `None` when no envelope was built
    fn emit(&self, event: Event) -> Option<DeliveryHandle> {
        let envelope = self.builder.build(event)?;
        Some(self.delivery.send(&envelope))
    }

    fn sample_scroll(&self, metrics: &crate::autotrack::ScrollMetrics) -> Vec<DeliveryHandle> {
        self.auto
            .sample_scroll(metrics)
            .into_iter()
            .filter_map(|kind| self.emit(Event::new(kind)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MemoryTransport;
    use serde_json::json;

    fn make_tracker(config: TrackerConfig) -> (Tracker, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let tracker = Tracker::builder(config)
            .transport(transport.clone())
            .build()
            .unwrap();
        (tracker, transport)
    }

    #[tokio::test]
    async fn test_track_custom_event() {
        let (tracker, transport) = make_tracker(TrackerConfig::for_site("SITE1"));

        let mut params = Params::new();
        params.insert("plan".to_string(), json!("pro"));
        let outcome = tracker.track("signup", params).unwrap().outcome().await;
        assert!(outcome.is_delivered());

        let envelopes = transport.envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0]["event"]["event_type"], "custom");
        assert_eq!(envelopes[0]["event"]["name"], "signup");
        assert_eq!(envelopes[0]["event"]["params"]["plan"], "pro");
        assert_eq!(
            envelopes[0]["event"]["params"]["client_id"],
            tracker.client_id()
        );
    }

    #[tokio::test]
    async fn test_without_measurement_id_nothing_is_sent() {
        let (tracker, transport) = make_tracker(TrackerConfig::default());

        assert!(tracker.track("signup", Params::new()).is_none());
        assert!(tracker.track_page_view().is_none());
        assert!(tracker.attach().is_none());
        assert!(transport.requests().is_empty());
        assert_eq!(tracker.delivery_stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_track_commerce_spreads_data() {
        let (tracker, transport) = make_tracker(TrackerConfig::for_site("SITE1"));

        let data = EcommerceData {
            transaction_id: Some("T-1".to_string()),
            value: Some(42.0),
            currency: Some("USD".to_string()),
            ..Default::default()
        };
        tracker
            .track_commerce(EcommerceAction::Purchase, &data)
            .unwrap()
            .outcome()
            .await;

        let event = &transport.envelopes()[0]["event"];
        assert_eq!(event["event_type"], "purchase");
        assert_eq!(event["transaction_id"], "T-1");
        assert_eq!(event["value"], 42.0);
        assert!(event["params"].get("transaction_id").is_none());
    }

    #[tokio::test]
    async fn test_user_id_not_merged_into_events() {
        let (tracker, transport) = make_tracker(TrackerConfig::for_site("SITE1"));

        tracker.set_user_id("user-9");
        assert_eq!(tracker.get_user_id().as_deref(), Some("user-9"));

        tracker.track_page_view().unwrap().outcome().await;
        let event = &transport.envelopes()[0]["event"];
        assert_eq!(event["user_id"], serde_json::Value::Null);
        assert!(event["params"].get("user_id").is_none());
    }

    #[tokio::test]
    async fn test_auto_track_disabled() {
        let config = TrackerConfig {
            auto_track: false,
            ..TrackerConfig::for_site("SITE1")
        };
        let (tracker, transport) = make_tracker(config);

        assert!(tracker.attach().is_none());
        let handles = tracker.handle_signal(&PageSignal::Click {
            path: vec![crate::autotrack::Element::link("/about")],
        });
        assert!(handles.is_empty());
        assert!(transport.requests().is_empty());
    }
}
