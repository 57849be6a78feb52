//! # signage-core: Pure Domain Model for the Signage Player Sync Core
//!
//! Device configuration, typed settings, on/off timer identity and value
//! validation. Everything here is deterministic and free of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Signage Player Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Host process (player shell, web view)               │   │
//! │  │    settings store ── device capabilities ── pub/sub client      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ traits                                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    signage-sync (engine)                        │   │
//! │  │   scheduler, network monitor, deployment verifier, bridge       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ signage-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │   timer   │  │ validation│                  │   │
//! │  │   │  Setting  │  │  OnOff    │  │  ranges   │                  │   │
//! │  │   │ CloudKey  │  │  Timer    │  │  formats  │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO CLOCK READS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - DeviceConfig, Setting, CloudKey and display types
//! - [`timer`] - On/off timer definitions and their derived ids
//! - [`error`] - Domain error types
//! - [`validation`] - Setting value validation
//!
//! ## Example Usage
//!
//! ```rust
//! use signage_core::{DeviceConfig, Setting};
//! use serde_json::json;
//!
//! let mut config = DeviceConfig::default();
//! let setting = Setting::from_cloud("volume", json!(30)).unwrap();
//! setting.apply_to(&mut config);
//! assert_eq!(config.volume, 30);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod timer;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use timer::{dedupe_timers, timer_uuid, DayOfWeek, OnOffTimerSetting};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Highest accepted output volume.
pub const MAX_VOLUME: u8 = 100;

/// Longest accepted log upload interval (one day, in minutes).
pub const MAX_UPLOAD_LOG_INTERVAL_MINUTES: u32 = 1440;

/// Query parameter carrying the access token on the content URL.
pub const ACCESS_TOKEN_PARAM: &str = "_fwi_accessToken";

/// Query parameter carrying the company id on the content URL.
pub const COMPANY_ID_PARAM: &str = "_fwi_cloudCompanyId";

/// Query parameter used to force a fresh load of the content URL.
pub const CACHE_BUST_PARAM: &str = "_fwi_cacheBust";
