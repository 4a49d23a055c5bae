//! Security audit sink.
//!
//! Append-only, asynchronous, and never on the request's critical path:
//! - Validation handlers enqueue sealed [`SecurityEvent`]s through a
//!   cheap-to-clone handle
//! - A background task batches them into the security_events table
//! - Persistence failures fall back to the process log and are swallowed;
//!   an audit failure is its own observable, never a request failure
//!
//! ## Configuration
//!
//! - `QUIZBANK_AUDIT_BUFFER_SIZE`: Max events in buffer (default: 1000)
//! - `QUIZBANK_AUDIT_FLUSH_INTERVAL_MS`: Flush interval in milliseconds (default: 1000)

use std::sync::Arc;

use quizbank_core::types::SecurityEvent;
use quizbank_storage::{repositories::security_events, BankBackend};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default buffer size for audit events.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default flush interval in milliseconds.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Configuration for the audit sink.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Maximum number of events in the buffer.
    pub buffer_size: usize,
    /// Flush interval in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: std::env::var("QUIZBANK_AUDIT_BUFFER_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BUFFER_SIZE),
            flush_interval_ms: std::env::var("QUIZBANK_AUDIT_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
        }
    }
}

/// Handle for appending security events.
///
/// Cheap to clone; events are sent to a background task for batched writes.
#[derive(Clone)]
pub struct SecurityAuditSink {
    sender: mpsc::Sender<SecurityEvent>,
}

impl SecurityAuditSink {
    /// Create a new sink with the given configuration.
    ///
    /// Returns the handle and the receiver for the background writer task.
    pub fn new(config: &AuditConfig) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        (Self { sender }, receiver)
    }

    /// Append an event without blocking.
    ///
    /// If the buffer is full the event is dropped into the process log so
    /// appending never blocks or fails request processing.
    pub fn append(&self, event: SecurityEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    request_id = %event.request_id,
                    event_type = %event.event_type,
                    "audit buffer full, event dropped to process log"
                );
                log_event_as_fallback(&event, "buffer overflow");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!(
                    request_id = %event.request_id,
                    "audit channel closed, logging to process log"
                );
                log_event_as_fallback(&event, "channel closed");
            }
        }
    }

    /// Append an event, waiting for buffer space.
    ///
    /// Use where the caller can afford to wait; failures are still swallowed.
    pub async fn append_async(&self, event: SecurityEvent) {
        let request_id = event.request_id.clone();
        if self.sender.send(event).await.is_err() {
            error!(%request_id, "failed to enqueue audit event, writer gone");
        }
    }
}

/// Background task that writes audit events to the store.
///
/// Batches events from the channel, flushes on an interval or when a batch
/// fills, and drains the remainder when the channel closes.
pub async fn security_event_writer_task(
    mut receiver: mpsc::Receiver<SecurityEvent>,
    backend: Arc<dyn BankBackend>,
    config: AuditConfig,
) {
    let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);
    let mut batch: Vec<SecurityEvent> = Vec::with_capacity(100);
    let mut interval = tokio::time::interval(flush_interval);

    info!(
        buffer_size = config.buffer_size,
        flush_interval_ms = config.flush_interval_ms,
        "security event writer task started"
    );

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Some(e) => {
                        batch.push(e);
                        if batch.len() >= 100 {
                            flush_batch(&mut batch, &backend).await;
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        if !batch.is_empty() {
                            flush_batch(&mut batch, &backend).await;
                        }
                        info!("security event writer task shutting down");
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                if !batch.is_empty() {
                    flush_batch(&mut batch, &backend).await;
                }
            }
        }
    }
}

/// Flush a batch of events to the store, falling back to the process log.
async fn flush_batch(batch: &mut Vec<SecurityEvent>, backend: &Arc<dyn BankBackend>) {
    if batch.is_empty() {
        return;
    }

    let events: Vec<SecurityEvent> = std::mem::take(batch);
    let count = events.len();

    debug!(count, "flushing security event batch");

    let backend = Arc::clone(backend);
    let result = tokio::task::spawn_blocking(move || {
        let conn = match backend.get_connection() {
            Ok(conn) => conn,
            Err(e) => return Err((e, events)),
        };
        match security_events::append_batch(&conn, &events) {
            Ok(written) => Ok(written),
            Err(e) => Err((e, events)),
        }
    })
    .await;

    match result {
        Ok(Ok(written)) => {
            debug!(written, "security event batch written");
        }
        Ok(Err((e, events))) => {
            error!(error = %e, count, "failed to write security event batch");
            for event in &events {
                log_event_as_fallback(event, "store write failure");
            }
        }
        Err(e) => {
            error!(error = %e, count, "security event write task panicked");
        }
    }
}

/// Log an event to tracing when the store is unavailable.
fn log_event_as_fallback(event: &SecurityEvent, reason: &str) {
    warn!(
        target: "security_audit_fallback",
        event_type = %event.event_type,
        user_id = event.user_id,
        severity = event.severity.as_str(),
        request_id = %event.request_id,
        checksum = %event.checksum,
        reason,
        "security event (fallback)"
    );
}
