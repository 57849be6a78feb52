//! # Log Buffer
//!
//! Collects player log entries and hands them to the uploader.
//!
//! ## Buffer Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Log Buffer Flow                                  │
//! │                                                                         │
//! │  push(entry) ── online ───► memory ring (bounded, oldest evicted)      │
//! │      │                                                                  │
//! │      └───────── offline ──► durable copy ("offlineLogs" device setting)│
//! │                                                                         │
//! │  OFFLINE:  reset_memory()   memory cleared, durable copy untouched     │
//! │  ONLINE:   merge_durable()  durable entries placed ahead of memory,    │
//! │                             durable copy cleared                        │
//! │            drain()          everything handed to the uploader          │
//! │            requeue()        failed upload put back at the front        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use signage_core::LogLevel;

use crate::error::SyncResult;
use crate::ports::DeviceCapabilityProvider;

// =============================================================================
// Constants
// =============================================================================

/// Default number of entries kept in memory and in the durable copy.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Device setting key holding logs captured while offline.
pub const OFFLINE_LOGS_KEY: &str = "offlineLogs";

// =============================================================================
// Log Entry
// =============================================================================

/// One player log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, level: LogLevel, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp,
            level,
            message: message.into(),
        }
    }
}

// =============================================================================
// Log Buffer
// =============================================================================

/// Bounded in-memory log ring with a durable offline copy.
pub struct LogBuffer {
    memory: VecDeque<LogEntry>,
    capacity: usize,
    device: Arc<dyn DeviceCapabilityProvider>,
}

impl LogBuffer {
    pub fn new(device: Arc<dyn DeviceCapabilityProvider>, capacity: usize) -> Self {
        LogBuffer {
            memory: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity: capacity.max(1),
            device,
        }
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Adds an entry. Offline entries go to the durable copy, falling back
    /// to memory when the device cannot store them.
    pub async fn push(&mut self, entry: LogEntry, online: bool) {
        if !online {
            match self.persist(&entry).await {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "Failed to persist offline log entry"),
            }
        }

        if self.memory.len() == self.capacity {
            self.memory.pop_front();
        }
        self.memory.push_back(entry);
    }

    /// Drops in-memory entries only.
    pub fn reset_memory(&mut self) {
        debug!(dropped = self.memory.len(), "Resetting in-memory logs");
        self.memory.clear();
    }

    /// Moves durable entries ahead of in-memory ones and clears the durable copy.
    pub async fn merge_durable(&mut self) -> SyncResult<usize> {
        let durable = self.read_durable().await?;
        let merged = durable.len();
        if merged == 0 {
            return Ok(0);
        }

        self.requeue(durable);
        self.device.set_setting(OFFLINE_LOGS_KEY, "[]").await?;
        debug!(merged, "Merged offline logs");
        Ok(merged)
    }

    /// Hands every in-memory entry to the caller.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.memory.drain(..).collect()
    }

    /// Puts entries back at the front, keeping their order.
    ///
    /// When over capacity the oldest entries are dropped.
    pub fn requeue(&mut self, entries: Vec<LogEntry>) {
        for entry in entries.into_iter().rev() {
            self.memory.push_front(entry);
        }
        while self.memory.len() > self.capacity {
            self.memory.pop_front();
        }
    }

    async fn read_durable(&self) -> SyncResult<Vec<LogEntry>> {
        let raw = self.device.get_setting(OFFLINE_LOGS_KEY).await?;
        match raw.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(json) => match serde_json::from_str(json) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable offline logs");
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn persist(&self, entry: &LogEntry) -> SyncResult<()> {
        let mut durable = self.read_durable().await?;
        durable.push(entry.clone());
        if durable.len() > self.capacity {
            let excess = durable.len() - self.capacity;
            durable.drain(..excess);
        }
        let json = serde_json::to_string(&durable)?;
        self.device.set_setting(OFFLINE_LOGS_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDevice;
    use chrono::TimeZone;

    fn entry(n: u32) -> LogEntry {
        LogEntry::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, n).unwrap(),
            LogLevel::Info,
            format!("line {}", n),
        )
    }

    fn messages(entries: &[LogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.message.clone()).collect()
    }

    #[tokio::test]
    async fn test_memory_is_bounded() {
        let device = Arc::new(FakeDevice::default());
        let mut logs = LogBuffer::new(device, 3);
        for n in 0..5 {
            logs.push(entry(n), true).await;
        }
        assert_eq!(messages(&logs.drain()), vec!["line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_offline_entries_survive_memory_reset() {
        let device = Arc::new(FakeDevice::default());
        let mut logs = LogBuffer::new(device.clone(), 10);

        logs.push(entry(0), true).await;
        logs.push(entry(1), false).await;
        logs.push(entry(2), false).await;
        assert_eq!(logs.len(), 1);
        logs.reset_memory();
        assert!(logs.is_empty());

        logs.push(entry(3), true).await;
        assert_eq!(logs.merge_durable().await.unwrap(), 2);
        assert_eq!(
            messages(&logs.drain()),
            vec!["line 1", "line 2", "line 3"]
        );

        // Durable copy cleared after merge.
        assert_eq!(logs.merge_durable().await.unwrap(), 0);
        assert_eq!(
            device.stored_setting(OFFLINE_LOGS_KEY).as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn test_requeue_keeps_order() {
        let device = Arc::new(FakeDevice::default());
        let mut logs = LogBuffer::new(device, 10);
        logs.push(entry(3), true).await;
        logs.requeue(vec![entry(1), entry(2)]);
        assert_eq!(
            messages(&logs.drain()),
            vec!["line 1", "line 2", "line 3"]
        );
    }

    #[tokio::test]
    async fn test_unreadable_durable_copy_is_discarded() {
        let device = Arc::new(FakeDevice::default());
        device.store_setting(OFFLINE_LOGS_KEY, "{broken");
        let mut logs = LogBuffer::new(device, 10);
        assert_eq!(logs.merge_durable().await.unwrap(), 0);
    }
}
