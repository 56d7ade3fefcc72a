//! Best-effort envelope delivery
//!
//! Envelopes are POSTed as JSON to `{endpoint}/api/v1/collect`. Delivery
//! follows a "never block the page" principle:
//! - each send runs on a detached tokio task, so the caller returns at once
//!   and the request is not tied to the lifetime of whatever triggered it
//! - exactly one attempt per envelope; no retry, backoff or queue
//! - non-2xx responses and network failures are swallowed and only
//!   reported through `tracing` when `debug` is on
//!
//! [`DeliveryHandle`] lets tests await the outcome. Production call sites
//! drop it.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::events::EventEnvelope;

/// Something that can POST a JSON body and report the HTTP status
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: String) -> Result<u16>;
}

// ============================================
// HTTP transport
// ============================================

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: String) -> Result<u16> {
        let response = self
            .http_client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        Ok(response.status().as_u16())
    }
}

// ============================================
// In-memory transport
// ============================================

/// A request captured by [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: String,
}

impl RecordedRequest {
    /// Body parsed as JSON (`Null` if it is not JSON)
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Records requests instead of sending them
#[derive(Debug)]
pub struct MemoryTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    status: AtomicU16,
    offline: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status: AtomicU16::new(202),
            offline: AtomicBool::new(false),
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `status`
    pub fn with_status(status: u16) -> Self {
        let transport = Self::default();
        transport.status.store(status, Ordering::SeqCst);
        transport
    }

    /// Fail every request as a network error would
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Everything posted so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().clone()
    }

    /// Posted bodies parsed as JSON
    pub fn envelopes(&self) -> Vec<serde_json::Value> {
        self.lock().iter().map(RecordedRequest::json).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn post_json(&self, url: &str, body: String) -> Result<u16> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("network unreachable".to_string()));
        }
        self.lock().push(RecordedRequest {
            url: url.to_string(),
            body,
        });
        Ok(self.status.load(Ordering::SeqCst))
    }
}

// ============================================
// Delivery client
// ============================================

/// Terminal result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx response
    Delivered(u16),
    /// Any other status
    Rejected(u16),
    /// Network or transport failure
    Failed(String),
    /// Nothing was sent (serialization failed or no async runtime)
    NotDispatched,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }
}

/// Completion notification for a dispatched envelope
#[derive(Debug)]
pub struct DeliveryHandle {
    task: Option<JoinHandle<DeliveryOutcome>>,
}

impl DeliveryHandle {
    fn not_dispatched() -> Self {
        Self { task: None }
    }

    /// Wait for the attempt to finish
    pub async fn outcome(self) -> DeliveryOutcome {
        match self.task {
            Some(task) => task
                .await
                .unwrap_or_else(|e| DeliveryOutcome::Failed(format!("delivery task failed: {}", e))),
            None => DeliveryOutcome::NotDispatched,
        }
    }
}

/// Delivery statistics
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Attempts started
    pub dispatched: AtomicUsize,
    /// 2xx responses
    pub delivered: AtomicUsize,
    /// Non-2xx responses
    pub rejected: AtomicUsize,
    /// Network failures
    pub failed: AtomicUsize,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySnapshot {
    pub dispatched: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Fire-and-forget sender for envelopes
pub struct DeliveryClient {
    collect_url: String,
    transport: Arc<dyn Transport>,
    debug: bool,
    stats: Arc<DeliveryStats>,
}

impl DeliveryClient {
    pub fn new(config: &TrackerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            collect_url: config.collect_url(),
            transport,
            debug: config.debug,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }

    /// Dispatch one envelope without waiting for it
    pub fn send(&self, envelope: &EventEnvelope) -> DeliveryHandle {
        let body = match envelope.to_json() {
            Ok(body) => body,
            Err(e) => {
                if self.debug {
                    tracing::warn!(event_id = %envelope.event_id, error = %e, "Failed to encode envelope");
                }
                return DeliveryHandle::not_dispatched();
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                if self.debug {
                    tracing::warn!(event_id = %envelope.event_id, "No async runtime, event not sent");
                }
                return DeliveryHandle::not_dispatched();
            }
        };

        if self.debug {
            tracing::info!(
                event_id = %envelope.event_id,
                event_type = %envelope.event.event_type(),
                url = %self.collect_url,
                "Tracking event"
            );
        }

        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let attempt = Attempt {
            transport: self.transport.clone(),
            url: self.collect_url.clone(),
            event_id: envelope.event_id.clone(),
            debug: self.debug,
            stats: self.stats.clone(),
        };

        DeliveryHandle {
            task: Some(runtime.spawn(attempt.run(body))),
        }
    }
}

/// State moved into the detached delivery task
struct Attempt {
    transport: Arc<dyn Transport>,
    url: String,
    event_id: String,
    debug: bool,
    stats: Arc<DeliveryStats>,
}

impl Attempt {
    async fn run(self, body: String) -> DeliveryOutcome {
        match self.transport.post_json(&self.url, body).await {
            Ok(status) if (200..300).contains(&status) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Delivered(status)
            }
            Ok(status) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                if self.debug {
                    tracing::warn!(event_id = %self.event_id, status, "Failed to send event");
                }
                DeliveryOutcome::Rejected(status)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                if self.debug {
                    tracing::warn!(event_id = %self.event_id, error = %e, "Error sending event");
                }
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventKind};
    use chrono::Utc;

    fn make_envelope() -> EventEnvelope {
        EventEnvelope {
            measurement_id: "SITE1".to_string(),
            timestamp: Utc::now(),
            event_id: "evt-1".to_string(),
            processed: false,
            event: Event::new(EventKind::Custom {
                name: "ping".to_string(),
            }),
        }
    }

    fn make_client(transport: Arc<MemoryTransport>) -> DeliveryClient {
        let config = TrackerConfig {
            endpoint: "https://collect.example.com/".to_string(),
            debug: true,
            ..TrackerConfig::for_site("SITE1")
        };
        DeliveryClient::new(&config, transport)
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_send_posts_envelope_to_collect_url() {
        let transport = Arc::new(MemoryTransport::new());
        let client = make_client(transport.clone());

        let outcome = client.send(&make_envelope()).outcome().await;
        assert_eq!(outcome, DeliveryOutcome::Delivered(202));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://collect.example.com/api/v1/collect");
        let body = requests[0].json();
        assert_eq!(body["event_id"], "evt-1");
        assert_eq!(body["event"]["event_type"], "custom");
    }

    #[tokio::test]
    async fn test_non_2xx_is_swallowed_without_retry() {
        let transport = Arc::new(MemoryTransport::with_status(503));
        let client = make_client(transport.clone());

        let outcome = client.send(&make_envelope()).outcome().await;
        assert_eq!(outcome, DeliveryOutcome::Rejected(503));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(client.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_swallowed() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_offline(true);
        let client = make_client(transport.clone());

        let outcome = client.send(&make_envelope()).outcome().await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert!(transport.requests().is_empty());
        assert_eq!(
            client.stats(),
            DeliverySnapshot {
                dispatched: 1,
                delivered: 0,
                rejected: 0,
                failed: 1,
            }
        );
    }

    #[test]
    fn test_send_without_runtime_is_not_dispatched() {
        let transport = Arc::new(MemoryTransport::new());
        let client = make_client(transport.clone());

        let handle = client.send(&make_envelope());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(runtime.block_on(handle.outcome()), DeliveryOutcome::NotDispatched);
        assert_eq!(client.stats().dispatched, 0);
    }
}
