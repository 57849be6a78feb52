//! # Domain Types
//!
//! Device configuration and the typed settings that flow between the local
//! settings store and the cloud shadow.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DeviceConfig   │   │    Setting      │   │    CloudKey     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  current_url    │◄──│  one field,     │──►│  "currentURL"   │       │
//! │  │  cached_url     │   │  typed value    │   │  "logLevel"     │       │
//! │  │  log_level ...  │   │                 │   │  ...            │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  Device-local settings (cachedURL, accessCode, deviceId, companyId)    │
//! │  have no CloudKey and are never published.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::timer::{dedupe_timers, OnOffTimerSetting};
use crate::validation;

// =============================================================================
// Log Level
// =============================================================================

/// Player log verbosity, mirrored from the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(CoreError::InvalidSettingValue {
                key: "logLevel".to_string(),
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Display Types
// =============================================================================

/// Screen orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
    LandscapeFlipped,
    PortraitFlipped,
}

/// Output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh_rate)
    }
}

/// Current viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Device Capabilities
// =============================================================================

/// Platform capabilities, captured once at startup and consulted by value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFlags {
    /// Manufacturer string as reported by the platform.
    pub manufacturer: String,
    pub resolution_change: bool,
    pub volume_control: bool,
    pub cec: bool,
    pub firmware_update: bool,
    pub display_power: bool,
}

/// Which update channel a scheduled update check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Software,
    Firmware,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateKind::Software => write!(f, "software"),
            UpdateKind::Firmware => write!(f, "firmware"),
        }
    }
}

// =============================================================================
// Device Config
// =============================================================================

/// The subset of player configuration this core reads and writes.
///
/// Owned by the Local Settings Store; everything here goes through its
/// accessor contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default, rename = "currentURL")]
    pub current_url: Option<String>,
    #[serde(default, rename = "cachedURL")]
    pub cached_url: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Minutes between log uploads, 0 disables periodic upload.
    #[serde(default)]
    pub upload_log_time_interval: u32,
    #[serde(default)]
    pub reboot_time: Option<NaiveTime>,
    #[serde(default)]
    pub want_reboot: bool,
    #[serde(default, rename = "softwareUpdateURL")]
    pub software_update_url: Option<String>,
    #[serde(default)]
    pub software_update_time: Option<NaiveTime>,
    #[serde(default, rename = "firmwareUpdateURL")]
    pub firmware_update_url: Option<String>,
    #[serde(default)]
    pub firmware_update_time: Option<NaiveTime>,
    #[serde(default)]
    pub on_off_timers: Vec<OnOffTimerSetting>,
    #[serde(default)]
    pub on_off_timers_enabled: bool,
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub proxy_username: Option<String>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub cec_enabled: bool,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub time_server: Option<String>,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub encrypted_storage: bool,
}

fn default_volume() -> u8 {
    50
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_id: None,
            company_id: None,
            current_url: None,
            cached_url: None,
            access_code: None,
            log_level: LogLevel::default(),
            upload_log_time_interval: 0,
            reboot_time: None,
            want_reboot: false,
            software_update_url: None,
            software_update_time: None,
            firmware_update_url: None,
            firmware_update_time: None,
            on_off_timers: Vec::new(),
            on_off_timers_enabled: false,
            proxy_enabled: false,
            proxy_host: None,
            proxy_port: None,
            proxy_username: None,
            resolution: None,
            cec_enabled: false,
            timezone: None,
            time_server: None,
            orientation: Orientation::default(),
            volume: default_volume(),
            encrypted_storage: false,
        }
    }
}

impl DeviceConfig {
    /// Returns the current value of a cloud-mirrored field as a [`Setting`].
    pub fn cloud_setting(&self, key: CloudKey) -> Setting {
        match key {
            CloudKey::CurrentUrl => Setting::CurrentUrl(self.current_url.clone()),
            CloudKey::LogLevel => Setting::LogLevel(self.log_level),
            CloudKey::UploadLogTimeInterval => {
                Setting::UploadLogTimeInterval(self.upload_log_time_interval)
            }
            CloudKey::RebootTime => Setting::RebootTime(self.reboot_time),
            CloudKey::WantReboot => Setting::WantReboot(self.want_reboot),
            CloudKey::SoftwareUpdateUrl => {
                Setting::SoftwareUpdateUrl(self.software_update_url.clone())
            }
            CloudKey::SoftwareUpdateTime => Setting::SoftwareUpdateTime(self.software_update_time),
            CloudKey::FirmwareUpdateUrl => {
                Setting::FirmwareUpdateUrl(self.firmware_update_url.clone())
            }
            CloudKey::FirmwareUpdateTime => Setting::FirmwareUpdateTime(self.firmware_update_time),
            CloudKey::OnOffTimers => Setting::OnOffTimers(self.on_off_timers.clone()),
            CloudKey::OnOffTimersEnabled => Setting::OnOffTimersEnabled(self.on_off_timers_enabled),
            CloudKey::ProxyEnabled => Setting::ProxyEnabled(self.proxy_enabled),
            CloudKey::ProxyHost => Setting::ProxyHost(self.proxy_host.clone()),
            CloudKey::ProxyPort => Setting::ProxyPort(self.proxy_port),
            CloudKey::ProxyUsername => Setting::ProxyUsername(self.proxy_username.clone()),
            CloudKey::Resolution => Setting::Resolution(self.resolution),
            CloudKey::CecEnabled => Setting::CecEnabled(self.cec_enabled),
            CloudKey::Timezone => Setting::Timezone(self.timezone.clone()),
            CloudKey::TimeServer => Setting::TimeServer(self.time_server.clone()),
            CloudKey::Orientation => Setting::Orientation(self.orientation),
            CloudKey::Volume => Setting::Volume(self.volume),
            CloudKey::EncryptedStorage => Setting::EncryptedStorage(self.encrypted_storage),
        }
    }

    /// Full reported facet for every cloud-mirrored field.
    pub fn reported_state(&self) -> Map<String, Value> {
        CloudKey::ALL
            .iter()
            .map(|key| (key.as_str().to_string(), self.cloud_setting(*key).value()))
            .collect()
    }
}

// =============================================================================
// Cloud Key
// =============================================================================

/// Shadow key of a cloud-mirrored setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudKey {
    CurrentUrl,
    LogLevel,
    UploadLogTimeInterval,
    RebootTime,
    WantReboot,
    SoftwareUpdateUrl,
    SoftwareUpdateTime,
    FirmwareUpdateUrl,
    FirmwareUpdateTime,
    OnOffTimers,
    OnOffTimersEnabled,
    ProxyEnabled,
    ProxyHost,
    ProxyPort,
    ProxyUsername,
    Resolution,
    CecEnabled,
    Timezone,
    TimeServer,
    Orientation,
    Volume,
    EncryptedStorage,
}

/// Keys stored on the device but never mirrored.
const LOCAL_ONLY_KEYS: [&str; 4] = ["deviceId", "companyId", "cachedURL", "accessCode"];

impl CloudKey {
    pub const ALL: [CloudKey; 22] = [
        CloudKey::CurrentUrl,
        CloudKey::LogLevel,
        CloudKey::UploadLogTimeInterval,
        CloudKey::RebootTime,
        CloudKey::WantReboot,
        CloudKey::SoftwareUpdateUrl,
        CloudKey::SoftwareUpdateTime,
        CloudKey::FirmwareUpdateUrl,
        CloudKey::FirmwareUpdateTime,
        CloudKey::OnOffTimers,
        CloudKey::OnOffTimersEnabled,
        CloudKey::ProxyEnabled,
        CloudKey::ProxyHost,
        CloudKey::ProxyPort,
        CloudKey::ProxyUsername,
        CloudKey::Resolution,
        CloudKey::CecEnabled,
        CloudKey::Timezone,
        CloudKey::TimeServer,
        CloudKey::Orientation,
        CloudKey::Volume,
        CloudKey::EncryptedStorage,
    ];

    /// Key as it appears in the shadow document.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloudKey::CurrentUrl => "currentURL",
            CloudKey::LogLevel => "logLevel",
            CloudKey::UploadLogTimeInterval => "uploadLogTimeInterval",
            CloudKey::RebootTime => "rebootTime",
            CloudKey::WantReboot => "wantReboot",
            CloudKey::SoftwareUpdateUrl => "softwareUpdateURL",
            CloudKey::SoftwareUpdateTime => "softwareUpdateTime",
            CloudKey::FirmwareUpdateUrl => "firmwareUpdateURL",
            CloudKey::FirmwareUpdateTime => "firmwareUpdateTime",
            CloudKey::OnOffTimers => "onOffTimers",
            CloudKey::OnOffTimersEnabled => "onOffTimersEnabled",
            CloudKey::ProxyEnabled => "proxyEnabled",
            CloudKey::ProxyHost => "proxyHost",
            CloudKey::ProxyPort => "proxyPort",
            CloudKey::ProxyUsername => "proxyUsername",
            CloudKey::Resolution => "resolution",
            CloudKey::CecEnabled => "cecEnabled",
            CloudKey::Timezone => "timezone",
            CloudKey::TimeServer => "timeServer",
            CloudKey::Orientation => "orientation",
            CloudKey::Volume => "volume",
            CloudKey::EncryptedStorage => "encryptedStorage",
        }
    }
}

impl std::fmt::Display for CloudKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CloudKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = CloudKey::ALL.iter().find(|k| k.as_str() == s) {
            return Ok(*key);
        }
        if LOCAL_ONLY_KEYS.contains(&s) {
            return Err(CoreError::LocalOnlySetting(s.to_string()));
        }
        Err(CoreError::UnknownSetting(s.to_string()))
    }
}

// =============================================================================
// Setting
// =============================================================================

/// A typed single-field change to [`DeviceConfig`].
///
/// Serialized adjacently tagged so the tag doubles as the shadow key:
/// `{ "key": "volume", "value": 40 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value")]
pub enum Setting {
    // Device-local
    #[serde(rename = "deviceId")]
    DeviceId(Option<String>),
    #[serde(rename = "companyId")]
    CompanyId(Option<String>),
    #[serde(rename = "cachedURL")]
    CachedUrl(Option<String>),
    #[serde(rename = "accessCode")]
    AccessCode(Option<String>),

    // Cloud-mirrored
    #[serde(rename = "currentURL")]
    CurrentUrl(Option<String>),
    #[serde(rename = "logLevel")]
    LogLevel(LogLevel),
    #[serde(rename = "uploadLogTimeInterval")]
    UploadLogTimeInterval(u32),
    #[serde(rename = "rebootTime")]
    RebootTime(Option<NaiveTime>),
    #[serde(rename = "wantReboot")]
    WantReboot(bool),
    #[serde(rename = "softwareUpdateURL")]
    SoftwareUpdateUrl(Option<String>),
    #[serde(rename = "softwareUpdateTime")]
    SoftwareUpdateTime(Option<NaiveTime>),
    #[serde(rename = "firmwareUpdateURL")]
    FirmwareUpdateUrl(Option<String>),
    #[serde(rename = "firmwareUpdateTime")]
    FirmwareUpdateTime(Option<NaiveTime>),
    #[serde(rename = "onOffTimers")]
    OnOffTimers(Vec<OnOffTimerSetting>),
    #[serde(rename = "onOffTimersEnabled")]
    OnOffTimersEnabled(bool),
    #[serde(rename = "proxyEnabled")]
    ProxyEnabled(bool),
    #[serde(rename = "proxyHost")]
    ProxyHost(Option<String>),
    #[serde(rename = "proxyPort")]
    ProxyPort(Option<u16>),
    #[serde(rename = "proxyUsername")]
    ProxyUsername(Option<String>),
    #[serde(rename = "resolution")]
    Resolution(Option<Resolution>),
    #[serde(rename = "cecEnabled")]
    CecEnabled(bool),
    #[serde(rename = "timezone")]
    Timezone(Option<String>),
    #[serde(rename = "timeServer")]
    TimeServer(Option<String>),
    #[serde(rename = "orientation")]
    Orientation(Orientation),
    #[serde(rename = "volume")]
    Volume(u8),
    #[serde(rename = "encryptedStorage")]
    EncryptedStorage(bool),
}

impl Setting {
    /// Decodes a shadow key/value pair.
    ///
    /// Device-local keys are rejected: the cloud never owns them.
    pub fn from_cloud(key: &str, value: Value) -> CoreResult<Setting> {
        let cloud_key: CloudKey = key.parse()?;
        let setting: Setting =
            serde_json::from_value(json!({ "key": cloud_key.as_str(), "value": value })).map_err(
                |e| CoreError::InvalidSettingValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                },
            )?;
        let setting = setting.normalized();
        setting.validate()?;
        Ok(setting)
    }

    /// The shadow key, or `None` for device-local settings.
    pub fn cloud_key(&self) -> Option<CloudKey> {
        match self {
            Setting::DeviceId(_)
            | Setting::CompanyId(_)
            | Setting::CachedUrl(_)
            | Setting::AccessCode(_) => None,
            Setting::CurrentUrl(_) => Some(CloudKey::CurrentUrl),
            Setting::LogLevel(_) => Some(CloudKey::LogLevel),
            Setting::UploadLogTimeInterval(_) => Some(CloudKey::UploadLogTimeInterval),
            Setting::RebootTime(_) => Some(CloudKey::RebootTime),
            Setting::WantReboot(_) => Some(CloudKey::WantReboot),
            Setting::SoftwareUpdateUrl(_) => Some(CloudKey::SoftwareUpdateUrl),
            Setting::SoftwareUpdateTime(_) => Some(CloudKey::SoftwareUpdateTime),
            Setting::FirmwareUpdateUrl(_) => Some(CloudKey::FirmwareUpdateUrl),
            Setting::FirmwareUpdateTime(_) => Some(CloudKey::FirmwareUpdateTime),
            Setting::OnOffTimers(_) => Some(CloudKey::OnOffTimers),
            Setting::OnOffTimersEnabled(_) => Some(CloudKey::OnOffTimersEnabled),
            Setting::ProxyEnabled(_) => Some(CloudKey::ProxyEnabled),
            Setting::ProxyHost(_) => Some(CloudKey::ProxyHost),
            Setting::ProxyPort(_) => Some(CloudKey::ProxyPort),
            Setting::ProxyUsername(_) => Some(CloudKey::ProxyUsername),
            Setting::Resolution(_) => Some(CloudKey::Resolution),
            Setting::CecEnabled(_) => Some(CloudKey::CecEnabled),
            Setting::Timezone(_) => Some(CloudKey::Timezone),
            Setting::TimeServer(_) => Some(CloudKey::TimeServer),
            Setting::Orientation(_) => Some(CloudKey::Orientation),
            Setting::Volume(_) => Some(CloudKey::Volume),
            Setting::EncryptedStorage(_) => Some(CloudKey::EncryptedStorage),
        }
    }

    /// Tag name, local or cloud.
    pub fn key_name(&self) -> &'static str {
        match self {
            Setting::DeviceId(_) => "deviceId",
            Setting::CompanyId(_) => "companyId",
            Setting::CachedUrl(_) => "cachedURL",
            Setting::AccessCode(_) => "accessCode",
            other => other.cloud_key().map(|k| k.as_str()).unwrap_or("unknown"),
        }
    }

    /// The JSON value as it is published in the reported facet.
    pub fn value(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut tagged| tagged.get_mut("value").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Recomputes derived fields (timer ids, duplicate timers).
    pub fn normalized(self) -> Setting {
        match self {
            Setting::OnOffTimers(timers) => Setting::OnOffTimers(dedupe_timers(timers)),
            other => other,
        }
    }

    /// Validates the value before it reaches the settings store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Setting::CurrentUrl(Some(url))
            | Setting::CachedUrl(Some(url))
            | Setting::SoftwareUpdateUrl(Some(url))
            | Setting::FirmwareUpdateUrl(Some(url)) => validation::validate_http_url(self.key_name(), url),
            Setting::Volume(volume) => validation::validate_volume(*volume),
            Setting::UploadLogTimeInterval(minutes) => {
                validation::validate_upload_interval(*minutes)
            }
            Setting::ProxyPort(Some(port)) => validation::validate_port(*port),
            Setting::OnOffTimers(timers) => timers.iter().try_for_each(OnOffTimerSetting::validate),
            _ => Ok(()),
        }
    }

    /// Writes the value into a config.
    pub fn apply_to(self, config: &mut DeviceConfig) {
        match self {
            Setting::DeviceId(v) => config.device_id = v,
            Setting::CompanyId(v) => config.company_id = v,
            Setting::CachedUrl(v) => config.cached_url = v,
            Setting::AccessCode(v) => config.access_code = v,
            Setting::CurrentUrl(v) => config.current_url = v,
            Setting::LogLevel(v) => config.log_level = v,
            Setting::UploadLogTimeInterval(v) => config.upload_log_time_interval = v,
            Setting::RebootTime(v) => config.reboot_time = v,
            Setting::WantReboot(v) => config.want_reboot = v,
            Setting::SoftwareUpdateUrl(v) => config.software_update_url = v,
            Setting::SoftwareUpdateTime(v) => config.software_update_time = v,
            Setting::FirmwareUpdateUrl(v) => config.firmware_update_url = v,
            Setting::FirmwareUpdateTime(v) => config.firmware_update_time = v,
            Setting::OnOffTimers(v) => config.on_off_timers = v,
            Setting::OnOffTimersEnabled(v) => config.on_off_timers_enabled = v,
            Setting::ProxyEnabled(v) => config.proxy_enabled = v,
            Setting::ProxyHost(v) => config.proxy_host = v,
            Setting::ProxyPort(v) => config.proxy_port = v,
            Setting::ProxyUsername(v) => config.proxy_username = v,
            Setting::Resolution(v) => config.resolution = v,
            Setting::CecEnabled(v) => config.cec_enabled = v,
            Setting::Timezone(v) => config.timezone = v,
            Setting::TimeServer(v) => config.time_server = v,
            Setting::Orientation(v) => config.orientation = v,
            Setting::Volume(v) => config.volume = v,
            Setting::EncryptedStorage(v) => config.encrypted_storage = v,
        }
    }
}
