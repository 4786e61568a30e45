//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Guard code on request paths
//! sends [`ActivityEvent`]s through a bounded crossbeam channel with
//! `try_send()`, so an admission check never waits on log IO.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DsgError, Result};
use crate::guard::policy::Decision;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    GuardStarted {
        version: String,
        config_hash: String,
    },
    ScanCompleted {
        root: String,
        size_bytes: u64,
        file_count: u64,
        skipped_count: u64,
        duration_ms: u64,
    },
    ScanFailed {
        root: String,
        error_code: String,
        error_message: String,
    },
    EntrySkipped {
        path: String,
        reason: String,
    },
    CacheInvalidated {
        cause: String,
    },
    AdmissionDecided {
        operation: String,
        decision: Decision,
        usage_bytes: u64,
        limit_bytes: u64,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply-cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Never blocks; a full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and stop. Join its handle to wait for it.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Spawn the logger thread.
///
/// The thread runs until `shutdown()` is called or every handle is dropped.
pub fn spawn_logger(
    config: JsonlConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger_with_capacity(config, CHANNEL_CAPACITY)
}

pub fn spawn_logger_with_capacity(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("dsg-logger".to_string())
        .spawn(move || logger_thread_main(rx, config, dropped))
        .map_err(|e| DsgError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: Receiver<ActivityEvent>, config: JsonlConfig, dropped: Arc<AtomicU64>) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::LogDropped, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        let Some(entry) = event_to_log_entry(&event) else {
            break;
        };
        jsonl.write_entry(&entry);
        // Flush when idle so tailing readers see entries promptly.
        if rx.is_empty() {
            jsonl.flush();
        }
    }

    jsonl.flush();
}

/// `None` for the shutdown marker, which is a control message and never logged.
fn event_to_log_entry(event: &ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::GuardStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::GuardStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::ScanCompleted {
            root,
            size_bytes,
            file_count,
            skipped_count,
            duration_ms,
        } => {
            let severity = if *skipped_count > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::ScanComplete, severity);
            e.path = Some(root.clone());
            e.size = Some(*size_bytes);
            e.files = Some(*file_count);
            e.skipped = Some(*skipped_count);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ActivityEvent::ScanFailed {
            root,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ScanFailed, Severity::Critical);
            e.path = Some(root.clone());
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::EntrySkipped { path, reason } => {
            let mut e = LogEntry::new(EventType::EntrySkipped, Severity::Warning);
            e.path = Some(path.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::CacheInvalidated { cause } => {
            let mut e = LogEntry::new(EventType::CacheInvalidated, Severity::Info);
            e.operation = Some(cause.clone());
            e
        }
        ActivityEvent::AdmissionDecided {
            operation,
            decision,
            usage_bytes,
            limit_bytes,
        } => {
            let (event_type, severity) = match decision {
                Decision::Allowed => (EventType::AdmissionAllowed, Severity::Info),
                Decision::Denied => (EventType::AdmissionDenied, Severity::Warning),
            };
            let mut e = LogEntry::new(event_type, severity);
            e.operation = Some(operation.clone());
            e.size = Some(*usage_bytes);
            e.limit = Some(*limit_bytes);
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}
