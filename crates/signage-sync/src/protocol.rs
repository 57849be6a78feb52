//! # Shadow Protocol Messages
//!
//! Topics and JSON documents exchanged with the cloud shadow service.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Protocol                                    │
//! │                                                                         │
//! │  REPORT (device → cloud)                                               │
//! │  ───────────────────────                                               │
//! │  $things/<id>/shadow/update                                            │
//! │    {"state":{"reported":{"volume":40},"desired":null}}                 │
//! │                                                                         │
//! │  DELTA (cloud → device)                                                │
//! │  ──────────────────────                                                │
//! │  $things/<id>/shadow/update/delta                                      │
//! │    {"version":7,"state":{"volume":40}}                                 │
//! │                                                                         │
//! │  SNAPSHOT (request → response)                                         │
//! │  ─────────────────────────────                                         │
//! │  $things/<id>/shadow/get            {}                                 │
//! │  $things/<id>/shadow/get/accepted                                      │
//! │    {"version":7,"state":{"desired":{..},"reported":{..},"delta":{..}}} │
//! │                                                                         │
//! │  LOGS (device → cloud)                                                 │
//! │  ─────────────────────                                                 │
//! │  $things/<id>/logs   {"deviceId":"..","logs":[..]}                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `"desired": null` in a report clears any pending cloud request for the
//! reported keys, which stops desired/reported ping-pong.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use signage_core::CloudKey;

use crate::error::{SyncError, SyncResult};
use crate::logs::LogEntry;

// =============================================================================
// Topics
// =============================================================================

/// Topic names scoped by device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    prefix: String,
}

impl ShadowTopics {
    pub fn new(device_id: &str) -> Self {
        ShadowTopics {
            prefix: format!("$things/{}", device_id),
        }
    }

    pub fn update(&self) -> String {
        format!("{}/shadow/update", self.prefix)
    }

    pub fn delta(&self) -> String {
        format!("{}/shadow/update/delta", self.prefix)
    }

    pub fn get(&self) -> String {
        format!("{}/shadow/get", self.prefix)
    }

    pub fn get_accepted(&self) -> String {
        format!("{}/shadow/get/accepted", self.prefix)
    }

    pub fn logs(&self) -> String {
        format!("{}/logs", self.prefix)
    }

    /// Topics subscribed after connecting.
    pub fn inbound(&self) -> [String; 2] {
        [self.delta(), self.get_accepted()]
    }

    /// Maps an inbound topic to the kind of document it carries.
    pub fn classify(&self, topic: &str) -> Option<InboundKind> {
        if topic == self.delta() {
            Some(InboundKind::Delta)
        } else if topic == self.get_accepted() {
            Some(InboundKind::Snapshot)
        } else {
            None
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A message delivered by the pub/sub connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Delta,
    Snapshot,
}

/// `shadow/update/delta` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShadowDelta {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub state: Map<String, Value>,
}

impl ShadowDelta {
    pub fn parse(payload: &str) -> SyncResult<Self> {
        serde_json::from_str(payload).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}

/// `shadow/get/accepted` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShadowSnapshot {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub state: SnapshotState,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SnapshotState {
    #[serde(default)]
    pub desired: Option<Map<String, Value>>,
    #[serde(default)]
    pub reported: Option<Map<String, Value>>,
    #[serde(default)]
    pub delta: Option<Map<String, Value>>,
}

impl ShadowSnapshot {
    pub fn parse(payload: &str) -> SyncResult<Self> {
        serde_json::from_str(payload).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Reported-state update. Field order is part of the wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedUpdate {
    state: ReportedState,
}

#[derive(Debug, Clone, Serialize)]
struct ReportedState {
    reported: Map<String, Value>,
    desired: Option<Value>,
}

impl ReportedUpdate {
    /// Report for a single key; always clears `desired`.
    pub fn single(key: CloudKey, value: Value) -> Self {
        let mut reported = Map::new();
        reported.insert(key.as_str().to_string(), value);
        ReportedUpdate {
            state: ReportedState {
                reported,
                desired: None,
            },
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Log upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub device_id: String,
    pub logs: Vec<LogEntry>,
}

impl LogBatch {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
