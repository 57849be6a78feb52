//! # Maintenance Planner
//!
//! Keeps the daily reboot, the update checks and the periodic log upload on
//! the scheduler in line with the device configuration.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Maintenance Tasks                                  │
//! │                                                                         │
//! │  "Reboot"           daily at rebootTime          if wantReboot          │
//! │  "Software update"  daily at softwareUpdateTime  if softwareUpdateURL   │
//! │  "Firmware update"  daily at firmwareUpdateTime  if firmwareUpdateURL   │
//! │                                                  and firmware capable   │
//! │  "Upload logs"      every uploadLogTimeInterval  if interval > 0        │
//! │                                                                         │
//! │  Each task re-schedules itself when it fires. A disabled task is       │
//! │  cancelled by name.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use signage_core::{DeviceConfig, UpdateKind};

use crate::bridge::BridgeHandle;
use crate::clock::Clock;
use crate::error::TaskError;
use crate::ports::DeviceCapabilityProvider;
use crate::scheduler::TaskScheduler;

pub const REBOOT_TASK: &str = "Reboot";
pub const SOFTWARE_UPDATE_TASK: &str = "Software update";
pub const FIRMWARE_UPDATE_TASK: &str = "Firmware update";
pub const UPLOAD_LOGS_TASK: &str = "Upload logs";

/// Next instant strictly after `now` with local time of day `time`.
pub fn next_daily(time: NaiveTime, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&offset).date_naive();
    [today, today.succ_opt()?]
        .into_iter()
        .filter_map(|date| offset.from_local_datetime(&date.and_time(time)).single())
        .map(|at| at.with_timezone(&Utc))
        .find(|at| *at > now)
}

fn update_task_name(kind: UpdateKind) -> &'static str {
    match kind {
        UpdateKind::Software => SOFTWARE_UPDATE_TASK,
        UpdateKind::Firmware => FIRMWARE_UPDATE_TASK,
    }
}

/// Scheduler of device maintenance work.
pub struct MaintenancePlanner {
    scheduler: Arc<TaskScheduler>,
    device: Arc<dyn DeviceCapabilityProvider>,
    bridge: BridgeHandle,
}

impl MaintenancePlanner {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        device: Arc<dyn DeviceCapabilityProvider>,
        bridge: BridgeHandle,
    ) -> Self {
        MaintenancePlanner {
            scheduler,
            device,
            bridge,
        }
    }

    /// Brings every maintenance task in line with `config`.
    pub async fn reschedule(self: &Arc<Self>, config: &DeviceConfig) {
        self.schedule_reboot(config.want_reboot.then_some(config.reboot_time).flatten());
        self.schedule_update(
            UpdateKind::Software,
            config.software_update_url.clone(),
            config.software_update_time,
        );

        let firmware_capable = self.device.capabilities().await.firmware_update;
        self.schedule_update(
            UpdateKind::Firmware,
            config
                .firmware_update_url
                .clone()
                .filter(|_| firmware_capable),
            config.firmware_update_time,
        );

        self.schedule_log_upload(config.upload_log_time_interval);
    }

    fn next_daily(&self, time: NaiveTime) -> Option<DateTime<Utc>> {
        let clock = self.scheduler.clock();
        next_daily(time, clock.now(), clock.local_offset())
    }

    /// Daily reboot; `None` cancels it.
    pub fn schedule_reboot(self: &Arc<Self>, time: Option<NaiveTime>) {
        let Some((time, at)) = time.and_then(|t| Some((t, self.next_daily(t)?))) else {
            self.scheduler.cancel_by_name(REBOOT_TASK);
            return;
        };

        let this = Arc::clone(self);
        self.scheduler.schedule_replacing(
            move |_| async move {
                this.schedule_reboot(Some(time));
                info!("Scheduled reboot");
                this.device.reboot().await?;
                Ok::<(), TaskError>(())
            },
            at,
            REBOOT_TASK,
            json!({ "time": time.to_string() }),
        );
        debug!(%at, "Reboot scheduled");
    }

    /// Daily update check; cancelled unless both url and time are set.
    pub fn schedule_update(self: &Arc<Self>, kind: UpdateKind, url: Option<String>, time: Option<NaiveTime>) {
        let name = update_task_name(kind);
        let (Some(url), Some(time)) = (url, time) else {
            self.scheduler.cancel_by_name(name);
            return;
        };
        let Some(at) = self.next_daily(time) else {
            self.scheduler.cancel_by_name(name);
            return;
        };

        let this = Arc::clone(self);
        let payload = json!({ "kind": kind, "url": url });
        self.scheduler.schedule_replacing(
            move |_| async move {
                this.schedule_update(kind, Some(url.clone()), Some(time));
                info!(%kind, %url, "Installing update");
                this.device.install_update(kind, &url).await?;
                Ok::<(), TaskError>(())
            },
            at,
            name,
            payload,
        );
        debug!(%kind, %at, "Update check scheduled");
    }

    /// Periodic log upload; `0` cancels it.
    pub fn schedule_log_upload(self: &Arc<Self>, interval_minutes: u32) {
        if interval_minutes == 0 {
            self.scheduler.cancel_by_name(UPLOAD_LOGS_TASK);
            return;
        }

        let this = Arc::clone(self);
        self.scheduler.schedule_in(
            move |_| async move {
                this.schedule_log_upload(interval_minutes);
                this.bridge.upload_logs().await?;
                Ok::<(), TaskError>(())
            },
            Duration::from_secs(u64::from(interval_minutes) * 60),
            UPLOAD_LOGS_TASK,
            Value::Null,
        );
        debug!(interval_minutes, "Log upload scheduled");
    }
}
