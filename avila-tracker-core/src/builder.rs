//! Envelope construction
//!
//! [`EventBuilder::build`] stamps a caller's [`Event`] with identity,
//! context and transport metadata. Generated params are written first and
//! the caller's own `params` are applied on top, so a caller key always
//! wins over a generated key of the same name (shallow merge).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::{self, Environment};
use crate::events::{Event, EventEnvelope, Params};
use crate::identity::{Clock, IdentityStore};

/// Builds envelopes for one measurement id
pub struct EventBuilder {
    measurement_id: Option<String>,
    debug: bool,
    identity: Arc<IdentityStore>,
    environment: Arc<dyn Environment>,
    clock: Arc<dyn Clock>,
}

impl EventBuilder {
    pub fn new(
        measurement_id: Option<String>,
        debug: bool,
        identity: Arc<IdentityStore>,
        environment: Arc<dyn Environment>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            measurement_id: measurement_id.filter(|id| !id.is_empty()),
            debug,
            identity,
            environment,
            clock,
        }
    }

    /// Wrap `event` in an envelope, or `None` when no measurement id is configured
    ///
    /// Identity is only resolved once a measurement id is known, so a
    /// suppressed event does not touch the session either.
    pub fn build(&self, event: Event) -> Option<EventEnvelope> {
        let Some(measurement_id) = self.measurement_id.as_ref() else {
            if self.debug {
                tracing::warn!(
                    event_type = %event.event_type(),
                    "No measurement id configured, event dropped"
                );
            }
            return None;
        };

        let mut params = self.generated_params();
        params.extend(event.params);

        let envelope = EventEnvelope {
            measurement_id: measurement_id.clone(),
            timestamp: self.now(),
            event_id: uuid::Uuid::new_v4().to_string(),
            processed: false,
            event: Event {
                kind: event.kind,
                params,
            },
        };

        if self.debug {
            tracing::info!(
                event_id = %envelope.event_id,
                event_type = %envelope.event.event_type(),
                "Built envelope"
            );
        }

        Some(envelope)
    }

    /// Identity and context params for an envelope built now
    fn generated_params(&self) -> Params {
        let fields = context::collect(self.environment.as_ref());

        let mut params = Params::new();
        params.insert(
            "client_id".to_string(),
            Value::String(self.identity.get_client_id()),
        );
        params.insert(
            "session_id".to_string(),
            Value::String(self.identity.get_session_id()),
        );
        params.insert("user_agent".to_string(), Value::String(fields.user_agent));
        params.insert("language".to_string(), Value::String(fields.language));
        params.insert(
            "screen_resolution".to_string(),
            Value::String(fields.screen_resolution),
        );
        params.insert(
            "viewport_size".to_string(),
            Value::String(fields.viewport_size),
        );
        params.insert(
            "device_category".to_string(),
            Value::String(fields.device_category.as_str().to_string()),
        );
        params
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis()).unwrap_or_else(Utc::now)
    }
}
