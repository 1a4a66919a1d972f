//! # Session Journal
//!
//! Appends one JSON object per session event to a JSONL file.
//!
//! ```text
//! {"timestamp":"2026-05-02T14:03:11.204Z","event":"started","sink":"serial"}
//! {"timestamp":"2026-05-02T14:03:13.871Z","event":"device_connected","name":"Xbox Wireless Controller"}
//! {"timestamp":"2026-05-02T14:05:40.002Z","event":"mode_changed","mode":"solo"}
//! ```
//!
//! Lines are handed to a background writer thread, so recording never blocks
//! the control loop on disk I/O. Dropping the journal flushes what is queued.
//! Journal write failures are logged and never stop the rover.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::controller::router::InputMode;
use crate::error::Result;

/// Something worth recording about a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { sink: String },
    DeviceConnected { name: String },
    DeviceLost,
    LinkConnected,
    LinkLost { drops: u64 },
    ModeChanged { mode: InputMode },
    EmergencyStop,
    LinkReset,
    Shutdown { reason: String },
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a SessionEvent,
}

/// JSONL event log; a disabled journal discards everything
#[derive(Default)]
pub struct Journal {
    writer: Option<(NonBlocking, WorkerGuard)>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("enabled", &self.is_enabled()).finish()
    }
}

impl Journal {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open `path` for appending, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file can't be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        // Session events are rare; never drop one.
        let writer = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("rover-journal")
            .finish(file);
        debug!("Session journal at {}", path.display());
        Ok(Self {
            writer: Some(writer),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn record(&mut self, event: SessionEvent) {
        let Some((writer, _)) = self.writer.as_mut() else {
            return;
        };
        let record = Record {
            timestamp: Utc::now(),
            event: &event,
        };
        // One write per record keeps lines whole on the writer thread.
        let written = serde_json::to_vec(&record)
            .map_err(std::io::Error::from)
            .and_then(|mut line| {
                line.push(b'\n');
                writer.write_all(&line)
            });
        if let Err(e) = written {
            warn!("Failed to write session journal: {}", e);
        }
    }
}
