//! Event payloads and the envelope wire format
//!
//! Every event is an [`EventKind`] (the `event_type` tag plus its typed
//! fields) and an open `params` map. On the wire both are flattened into one
//! JSON object:
//!
//! ```text
//! {
//!   "measurement_id": "SITE1",
//!   "timestamp": "2024-05-01T12:00:00.000Z",
//!   "event_id": "6f1c...",
//!   "processed": false,
//!   "event": {
//!     "event_type": "click",
//!     "element_id": "cta", ...,
//!     "params": { "client_id": "cid_...", "session_id": "ses_...", ... }
//!   }
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::Result;

/// Open string-to-value map carried in `event.params`
pub type Params = Map<String, Value>;

/// Field names an e-commerce data map may not overwrite
const RESERVED_FIELDS: [&str; 2] = ["event_type", "params"];

/// Typed event payload, one variant per `event_type`
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PageView {
        page_title: String,
        page_location: String,
        page_referrer: Option<String>,
        user_id: Option<String>,
    },
    Click {
        element_id: Option<String>,
        element_class: Option<String>,
        element_text: Option<String>,
        link_url: Option<String>,
    },
    FileDownload {
        file_name: String,
        file_extension: String,
        link_url: String,
    },
    FormSubmit {
        form_id: String,
        form_name: Option<String>,
    },
    Scroll {
        percent_scrolled: u8,
    },
    Custom {
        name: String,
    },
    /// Caller-named commerce event; `data` is spread next to `event_type`
    Ecommerce {
        event_type: String,
        data: Params,
    },
}

impl EventKind {
    /// Value of the `event_type` tag
    pub fn event_type(&self) -> &str {
        match self {
            EventKind::PageView { .. } => "page_view",
            EventKind::Click { .. } => "click",
            EventKind::FileDownload { .. } => "file_download",
            EventKind::FormSubmit { .. } => "form_submit",
            EventKind::Scroll { .. } => "scroll",
            EventKind::Custom { .. } => "custom",
            EventKind::Ecommerce { event_type, .. } => event_type,
        }
    }

    /// Type-specific fields, without `event_type` or `params`
    fn fields(&self) -> Map<String, Value> {
        let value = match self {
            EventKind::PageView {
                page_title,
                page_location,
                page_referrer,
                user_id,
            } => json!({
                "page_title": page_title,
                "page_location": page_location,
                "page_referrer": page_referrer,
                "user_id": user_id,
            }),
            EventKind::Click {
                element_id,
                element_class,
                element_text,
                link_url,
            } => json!({
                "element_id": element_id,
                "element_class": element_class,
                "element_text": element_text,
                "link_url": link_url,
            }),
            EventKind::FileDownload {
                file_name,
                file_extension,
                link_url,
            } => json!({
                "file_name": file_name,
                "file_extension": file_extension,
                "link_url": link_url,
            }),
            EventKind::FormSubmit { form_id, form_name } => json!({
                "form_id": form_id,
                "form_name": form_name,
            }),
            EventKind::Scroll { percent_scrolled } => json!({
                "percent_scrolled": percent_scrolled,
            }),
            EventKind::Custom { name } => json!({ "name": name }),
            EventKind::Ecommerce { data, .. } => {
                let mut fields = data.clone();
                for reserved in RESERVED_FIELDS {
                    fields.remove(reserved);
                }
                return fields;
            }
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// An event payload plus its params
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub params: Params,
}

impl Event {
    /// Event with empty params
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            params: Params::new(),
        }
    }

    pub fn with_params(kind: EventKind, params: Params) -> Self {
        Self { kind, params }
    }

    pub fn event_type(&self) -> &str {
        self.kind.event_type()
    }

    /// Flattened JSON object as sent on the wire
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.kind.fields();
        map.insert(
            "event_type".to_string(),
            Value::String(self.kind.event_type().to_string()),
        );
        map.insert("params".to_string(), Value::Object(self.params.clone()));
        map
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

/// The top-level record posted to the collection endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Site/tenant identifier
    pub measurement_id: String,

    /// Capture time
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,

    /// Fresh per envelope
    pub event_id: String,

    /// Always false at emission; owned by the collector
    pub processed: bool,

    pub event: Event,
}

impl EventEnvelope {
    /// Serialize as the request body
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// ISO-8601 in UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
fn serialize_iso_millis<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}
