//! Logging and event bus demonstration
//!
//! Shows the logging infrastructure in its different output modes and the
//! event bus that carries cache lifecycle events.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run --example logging_demo
//!
//! # JSON format
//! cargo run --example logging_demo -- json
//!
//! # Compact format
//! cargo run --example logging_demo -- compact
//!
//! # With custom filter
//! cargo run --example logging_demo -- pretty "core_runtime=trace"
//! ```

use std::env;

use tracing::{debug, info, instrument, span, warn, Level};

use core_runtime::events::{
    CacheEvent, CoreEvent, DownloadEvent, EventBus, EventStream, OfflineEvent,
};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = if args.len() > 1 {
        match args[1].as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    } else {
        LogFormat::default()
    };

    let filter = args.get(2).cloned();

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_spans(true)
        .with_target(true);

    if let Some(f) = filter {
        config = config.with_filter(f);
    }

    init_logging(config).expect("Failed to initialize logging");

    info!("=== Logging & Events Demo ===");
    info!(format = ?format, "Logging initialized");

    demo_structured_logging();
    demo_spans().await;
    demo_event_bus().await;

    info!("=== Demo Complete ===");
}

fn demo_structured_logging() {
    let span = span!(Level::INFO, "structured_logging");
    let _enter = span.enter();

    info!("Simple message without fields");

    info!(
        song_id = "song-42",
        title = "Demo Track",
        quality = "128kbps",
        size_bytes = 4_200_000u64,
        "Song cached"
    );

    info!(
        used_bytes = 512_000_000u64,
        ceiling_bytes = 4_294_967_296u64,
        song_count = 127,
        "Storage budget snapshot"
    );
}

async fn demo_spans() {
    let span = span!(Level::INFO, "download", song_id = "song-42");
    let _enter = span.enter();

    info!("Starting download");

    {
        let inner = span!(Level::DEBUG, "stream");
        let _inner = inner.enter();

        debug!(bytes_downloaded = 65_536, total_bytes = 4_200_000, "Chunk received");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    {
        let inner = span!(Level::DEBUG, "commit");
        let _inner = inner.enter();

        debug!(size_bytes = 4_200_000, "Audio blob committed");
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    info!(attempts = 1, "Download completed");
}

#[instrument]
async fn demo_event_bus() {
    let bus = EventBus::new(64);

    // A filtered stream that only sees download events.
    let mut downloads = EventStream::new(bus.subscribe())
        .filter(|event| matches!(event, CoreEvent::Download(_)));
    let mut everything = bus.subscribe();

    bus.emit(CoreEvent::Download(DownloadEvent::Started {
        song_id: "song-42".to_string(),
        title: "Demo Track".to_string(),
        quality: "128kbps".to_string(),
        total_bytes: Some(4_200_000),
    }))
    .ok();
    bus.emit(CoreEvent::Cache(CacheEvent::Evicted {
        song_id: "song-17".to_string(),
        freed_bytes: 3_100_000,
    }))
    .ok();
    bus.emit(CoreEvent::Offline(OfflineEvent::ModeChanged {
        offline: true,
        forced: false,
    }))
    .ok();
    bus.emit(CoreEvent::Download(DownloadEvent::Completed {
        song_id: "song-42".to_string(),
        size_bytes: 4_200_000,
        attempts: 1,
    }))
    .ok();

    info!(subscribers = bus.subscriber_count(), "Events published");

    while let Some(Ok(event)) = downloads.try_recv() {
        info!(
            description = event.description(),
            severity = ?event.severity(),
            "Filtered stream saw a download event"
        );
    }

    let mut seen = 0;
    while let Ok(event) = everything.try_recv() {
        seen += 1;
        if matches!(event.severity(), core_runtime::events::EventSeverity::Warning) {
            warn!(description = event.description(), "Warning-level event");
        }
    }
    info!(seen, "Unfiltered subscriber drained");
}
