//! # On/Off Timer Engine
//!
//! Turns the weekly on/off timer list into scheduled display power events.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Timer Scheduling                                   │
//! │                                                                         │
//! │  save([timer, ...])                                                     │
//! │     │ cancel every task this engine scheduled                           │
//! │     │ dedupe by timerUUID                                               │
//! │     ▼                                                                   │
//! │  per timer:  "OnOffTimer on <uuid>"   next on-day at onTime (local)     │
//! │              "OnOffTimer off <uuid>"  next on-day at offTime (local),   │
//! │                                       one day later when overnight      │
//! │                                                                         │
//! │  fire ──► set_display_power(on/off) ──► schedule following occurrence  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use signage_core::{dedupe_timers, DayOfWeek, OnOffTimerSetting};

use crate::clock::Clock;
use crate::error::TaskError;
use crate::ports::DeviceCapabilityProvider;
use crate::scheduler::TaskScheduler;

/// Prefix shared by every task name this engine owns.
pub const TIMER_TASK_PREFIX: &str = "OnOffTimer";

/// Which half of a timer a task triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    On,
    Off,
}

impl PowerEvent {
    fn as_str(&self) -> &'static str {
        match self {
            PowerEvent::On => "on",
            PowerEvent::Off => "off",
        }
    }
}

/// Task name for one half of a timer.
pub fn timer_task_name(event: PowerEvent, timer_uuid: &str) -> String {
    format!("{} {} {}", TIMER_TASK_PREFIX, event.as_str(), timer_uuid)
}

/// Next instant strictly after `now` at which `event` of `timer` happens,
/// interpreting times of day in `offset`.
pub fn next_occurrence(
    timer: &OnOffTimerSetting,
    event: PowerEvent,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    let (time, day_shift) = match event {
        PowerEvent::On => (timer.on_time, 0),
        PowerEvent::Off if timer.is_overnight() => (timer.off_time, 1),
        PowerEvent::Off => (timer.off_time, 0),
    };
    let today = now.with_timezone(&offset).date_naive();

    // Start a day early so an overnight off event from yesterday is found.
    (-1..=7)
        .filter_map(|days| {
            let base = today + Duration::days(days);
            if !timer.days.contains(&DayOfWeek::from(base.weekday())) {
                return None;
            }
            local_instant(offset, base + Duration::days(day_shift), time)
        })
        .filter(|at| *at > now)
        .min()
}

fn local_instant(
    offset: FixedOffset,
    date: chrono::NaiveDate,
    time: NaiveTime,
) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|at| at.with_timezone(&Utc))
}

/// Tasks owned by the engine and the chain they belong to.
#[derive(Default)]
struct TimerState {
    generation: u64,
    names: BTreeSet<String>,
}

/// Display power scheduler for on/off timers.
pub struct OnOffTimerEngine {
    scheduler: Arc<TaskScheduler>,
    device: Arc<dyn DeviceCapabilityProvider>,
    // Held across the generation check and the reschedule.
    state: Mutex<TimerState>,
}

impl OnOffTimerEngine {
    pub fn new(scheduler: Arc<TaskScheduler>, device: Arc<dyn DeviceCapabilityProvider>) -> Self {
        OnOffTimerEngine {
            scheduler,
            device,
            state: Mutex::new(TimerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Task names currently owned by the engine.
    pub fn task_names(&self) -> Vec<String> {
        self.state().names.iter().cloned().collect()
    }

    /// Replaces all timer tasks with ones built from `timers`.
    ///
    /// Returns the number of distinct timers scheduled.
    pub fn save(self: &Arc<Self>, timers: &[OnOffTimerSetting]) -> usize {
        let timers = dedupe_timers(timers.iter().cloned());

        let mut state = self.state();
        self.cancel_all(&mut state);
        for timer in &timers {
            self.schedule_event(&mut state, timer.clone(), PowerEvent::On);
            self.schedule_event(&mut state, timer.clone(), PowerEvent::Off);
        }
        drop(state);

        info!(count = timers.len(), "On/off timers scheduled");
        timers.len()
    }

    /// Cancels every timer task. The stored timer list is not touched.
    pub fn disable(&self) {
        let mut state = self.state();
        self.cancel_all(&mut state);
    }

    /// Starts a new generation and cancels the previous one's tasks.
    fn cancel_all(&self, state: &mut TimerState) {
        state.generation += 1;
        let names = std::mem::take(&mut state.names);
        for name in &names {
            self.scheduler.cancel_by_name(name);
        }
        if !names.is_empty() {
            debug!(cancelled = names.len(), "On/off timer tasks cancelled");
        }
    }

    /// Schedules the next `event` of `timer` in the current generation.
    fn schedule_event(
        self: &Arc<Self>,
        state: &mut TimerState,
        timer: OnOffTimerSetting,
        event: PowerEvent,
    ) {
        let clock = self.scheduler.clock();
        let Some(at) = next_occurrence(&timer, event, clock.now(), clock.local_offset()) else {
            warn!(timer = %timer.timer_uuid, "Timer has no upcoming occurrence");
            return;
        };

        let name = timer_task_name(event, &timer.timer_uuid);
        let payload = json!({ "timerUUID": timer.timer_uuid, "power": event.as_str() });
        let generation = state.generation;
        let this = Arc::clone(self);
        self.scheduler.schedule_replacing(
            move |_| this.fire(timer, event, generation),
            at,
            &name,
            payload,
        );
        state.names.insert(name);
    }

    async fn fire(
        self: Arc<Self>,
        timer: OnOffTimerSetting,
        event: PowerEvent,
        generation: u64,
    ) -> Result<(), TaskError> {
        {
            // A save() or disable() since scheduling makes this chain stale.
            let mut state = self.state();
            if state.generation == generation {
                self.schedule_event(&mut state, timer.clone(), event);
            }
        }

        let on = event == PowerEvent::On;
        info!(timer = %timer.timer_uuid, on, "On/off timer fired");
        self.device.set_display_power(on).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::fakes::{DeviceCall, FakeDevice};
    use crate::scheduler::TaskOutcome;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Monday 2024-03-04, 07:00 UTC.
    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap()
    }

    fn office_hours() -> OnOffTimerSetting {
        OnOffTimerSetting::new(
            [DayOfWeek::Monday, DayOfWeek::Wednesday, DayOfWeek::Friday],
            t(8, 30),
            t(18, 45),
        )
    }

    fn setup(offset: FixedOffset) -> (Arc<FakeClock>, Arc<TaskScheduler>, FakeDevice, Arc<OnOffTimerEngine>) {
        let clock = Arc::new(FakeClock::with_offset(monday_morning(), offset));
        let scheduler = Arc::new(TaskScheduler::new(clock.clone()));
        let device = FakeDevice::default();
        let engine = Arc::new(OnOffTimerEngine::new(scheduler.clone(), Arc::new(device.clone())));
        (clock, scheduler, device, engine)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_next_occurrence_same_day_and_following() {
        let timer = office_hours();
        assert_eq!(
            next_occurrence(&timer, PowerEvent::On, monday_morning(), utc()),
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap())
        );

        let after_on = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        assert_eq!(
            next_occurrence(&timer, PowerEvent::On, after_on, utc()),
            Some(Utc.with_ymd_and_hms(2024, 3, 6, 8, 30, 0).unwrap())
        );
        assert_eq!(
            next_occurrence(&timer, PowerEvent::Off, after_on, utc()),
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 18, 45, 0).unwrap())
        );
    }

    #[test]
    fn test_overnight_off_lands_next_day() {
        let timer = OnOffTimerSetting::new([DayOfWeek::Friday], t(22, 0), t(6, 0));
        assert_eq!(
            next_occurrence(&timer, PowerEvent::Off, monday_morning(), utc()),
            Some(Utc.with_ymd_and_hms(2024, 3, 9, 6, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_local_offset_is_applied() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            next_occurrence(&office_hours(), PowerEvent::On, monday_morning(), plus_two),
            Some(Utc.with_ymd_and_hms(2024, 3, 6, 6, 30, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_save_schedules_on_and_off() {
        let (_, scheduler, _, engine) = setup(utc());
        let timer = office_hours();
        assert_eq!(engine.save(&[timer.clone(), timer.clone()]), 1);

        let on = timer_task_name(PowerEvent::On, "mowefr083000184500");
        let off = timer_task_name(PowerEvent::Off, "mowefr083000184500");
        assert_eq!(on, "OnOffTimer on mowefr083000184500");
        assert!(scheduler.is_pending(&on));
        assert!(scheduler.is_pending(&off));
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_list() {
        let (_, scheduler, _, engine) = setup(utc());
        engine.save(&[office_hours()]);
        let weekend = OnOffTimerSetting::new([DayOfWeek::Saturday], t(10, 0), t(16, 0));
        engine.save(&[weekend]);

        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.is_pending("OnOffTimer on sa100000160000"));
        assert!(!scheduler.is_pending("OnOffTimer on mowefr083000184500"));
    }

    #[tokio::test]
    async fn test_disable_cancels_everything() {
        let (_, scheduler, _, engine) = setup(utc());
        engine.save(&[office_hours()]);
        engine.disable();
        assert!(scheduler.is_empty());
        assert!(engine.task_names().is_empty());
    }

    #[tokio::test]
    async fn test_firing_powers_display_and_reschedules() {
        let (clock, scheduler, device, engine) = setup(utc());
        engine.save(&[office_hours()]);

        clock.set(Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap());
        for task in scheduler.fire_due() {
            assert_eq!(task.outcome().await, TaskOutcome::Completed);
        }

        assert_eq!(device.calls(), vec![DeviceCall::SetDisplayPower(true)]);
        assert_eq!(
            scheduler.execution_time_of("OnOffTimer on mowefr083000184500"),
            Some(Utc.with_ymd_and_hms(2024, 3, 6, 8, 30, 0).unwrap())
        );
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_chain_does_not_reschedule() {
        let (clock, scheduler, _, engine) = setup(utc());
        engine.save(&[office_hours()]);

        // Fire after a disable: the already-removed task must not revive.
        clock.set(Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap());
        let fired = scheduler.fire_due();
        engine.disable();
        for task in fired {
            task.outcome().await;
        }
        assert!(!scheduler.is_pending("OnOffTimer on mowefr083000184500"));
    }

    #[tokio::test]
    async fn test_save_while_firing_keeps_new_chain() {
        let (clock, scheduler, device, engine) = setup(utc());
        engine.save(&[office_hours()]);

        let on = "OnOffTimer on mowefr083000184500";
        let wednesday = Utc.with_ymd_and_hms(2024, 3, 6, 8, 30, 0).unwrap();

        clock.set(Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap());
        let fired = scheduler.fire_due();
        engine.save(&[office_hours()]);
        for task in fired {
            assert_eq!(task.outcome().await, TaskOutcome::Completed);
        }

        assert_eq!(device.calls(), vec![DeviceCall::SetDisplayPower(true)]);
        assert_eq!(scheduler.execution_time_of(on), Some(wednesday));
        assert_eq!(scheduler.len(), 2);

        // The chain started by the second save keeps rescheduling itself.
        clock.set(wednesday);
        for task in scheduler.fire_due() {
            assert_eq!(task.outcome().await, TaskOutcome::Completed);
        }
        assert_eq!(
            scheduler.execution_time_of(on),
            Some(Utc.with_ymd_and_hms(2024, 3, 8, 8, 30, 0).unwrap())
        );
        assert_eq!(scheduler.len(), 2);
    }
}
