//! Tracker diagnostics are gated on `debug`
//!
//! Each scenario runs under a scoped `tracing` subscriber writing into a
//! buffer at the default `info` level, once with `debug` off and once on.

use std::io::Write;
use std::sync::{Arc, Mutex};

use avila_tracker_core::{
    MemoryTransport, Params, Storage, Tracker, TrackerConfig, UnavailableStorage,
};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Build a tracker from `config` and run `scenario` on a current-thread
/// runtime, returning everything logged meanwhile
fn logs_for(
    config: TrackerConfig,
    transport: Arc<MemoryTransport>,
    storage: Option<Arc<dyn Storage>>,
    scenario: impl FnOnce(Tracker) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()>>>,
) -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let mut builder = Tracker::builder(config).transport(transport);
            if let Some(storage) = storage {
                builder = builder.storage(storage);
            }
            scenario(builder.build().unwrap()).await;
        });
    });

    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

fn unset_site(debug: bool) -> TrackerConfig {
    TrackerConfig {
        debug,
        ..TrackerConfig::default()
    }
}

fn site(debug: bool) -> TrackerConfig {
    TrackerConfig {
        debug,
        ..TrackerConfig::for_site("SITE1")
    }
}

#[test]
fn test_missing_measurement_id_is_only_reported_in_debug() {
    let run = |debug| {
        logs_for(
            unset_site(debug),
            Arc::new(MemoryTransport::new()),
            None,
            |tracker| {
                Box::pin(async move {
                    assert!(tracker.track("signup", Params::new()).is_none());
                })
            },
        )
    };

    assert_eq!(run(false), "");
    let logs = run(true);
    assert!(logs.contains("No measurement id configured"), "got:\n{logs}");
}

#[test]
fn test_rejected_delivery_is_only_reported_in_debug() {
    let run = |debug| {
        logs_for(
            site(debug),
            Arc::new(MemoryTransport::with_status(500)),
            None,
            |tracker| {
                Box::pin(async move {
                    tracker
                        .track("signup", Params::new())
                        .unwrap()
                        .outcome()
                        .await;
                })
            },
        )
    };

    assert_eq!(run(false), "");
    let logs = run(true);
    assert!(logs.contains("Tracking event"), "got:\n{logs}");
    assert!(logs.contains("Failed to send event"), "got:\n{logs}");
    assert!(logs.contains("500"), "got:\n{logs}");
}

#[test]
fn test_storage_fallback_is_only_reported_in_debug() {
    let run = |debug| {
        logs_for(
            site(debug),
            Arc::new(MemoryTransport::new()),
            Some(Arc::new(UnavailableStorage)),
            |tracker| {
                Box::pin(async move {
                    assert!(tracker.client_id().starts_with("cid_"));
                })
            },
        )
    };

    assert_eq!(run(false), "");
    let logs = run(true);
    assert!(logs.contains("Storage unavailable"), "got:\n{logs}");
}
