// ABOUTME: Daily scan scheduling: next due time, misfire grace, coalescing and startup dedup.
// ABOUTME: Decisions are pure functions of (due, now, metadata); the Scheduler loop drives them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone};
use tracing::{debug, error, info, warn};

use crate::models::ScanMetadata;
use crate::monitor::{Monitor, Trigger};

/// Longest single sleep. Short enough that a suspend/resume jump in
/// wall-clock time is noticed within a minute.
pub const MAX_SLEEP_STEP: Duration = Duration::from_secs(60);

/// Once-a-day firing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    /// Local wall-clock time of the daily scan.
    pub at: NaiveTime,
    /// How late a firing may still run.
    pub misfire_grace: TimeDelta,
    /// Minimum age of the last scan before a startup scan runs.
    pub startup_threshold: TimeDelta,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            misfire_grace: TimeDelta::hours(1),
            startup_threshold: TimeDelta::hours(20),
        }
    }
}

/// What to do when the scheduler wakes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Not due yet; sleep this long.
    Wait(Duration),
    /// Run the scan now.
    Fire,
    /// Skip this slot and move to the next one.
    Coalesce,
}

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Due,
    Running,
}

impl DailySchedule {
    /// First firing strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        let today = self.fire_on(now.date_naive());
        if today > now {
            return today;
        }
        let mut date = now.date_naive();
        loop {
            date = date.succ_opt().unwrap_or(date);
            let candidate = self.fire_on(date);
            if candidate > now {
                return candidate;
            }
        }
    }

    /// The slot the scheduler should start from at `now`: today's firing if it
    /// has passed but is still within the grace period, otherwise the next one.
    /// A slot missed while the process was down still runs after a restart.
    pub fn first_due(&self, now: DateTime<Local>) -> DateTime<Local> {
        let today = self.fire_on(now.date_naive());
        let latest = if today <= now {
            Some(today)
        } else {
            now.date_naive().pred_opt().map(|date| self.fire_on(date))
        };
        match latest {
            Some(slot) if now - slot <= self.misfire_grace => slot,
            _ => self.next_fire_after(now),
        }
    }

    /// Local instant of the firing on `date`. A time that falls into a DST
    /// gap moves forward an hour.
    fn fire_on(&self, date: NaiveDate) -> DateTime<Local> {
        let naive = date.and_time(self.at);
        Local
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| Local.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
            .unwrap_or_else(|| Local.from_utc_datetime(&naive))
    }

    /// Decides what to do about the firing due at `due`.
    ///
    /// Past due by more than the grace period, or already served by a scan
    /// that completed at or after `due`, the slot is coalesced and no backlog
    /// is ever replayed. Scans that finished before `due` do not count.
    pub fn on_wake(
        &self,
        due: DateTime<Local>,
        now: DateTime<Local>,
        meta: &ScanMetadata,
    ) -> FireDecision {
        if now < due {
            let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
            return FireDecision::Wait(wait);
        }
        if now - due > self.misfire_grace {
            return FireDecision::Coalesce;
        }
        match meta.last_check_time {
            Some(last) if last >= due && last <= now => FireDecision::Coalesce,
            _ => FireDecision::Fire,
        }
    }

    /// Whether a scan should run at process start.
    ///
    /// Runs when nothing has been scanned yet (and no scan is recorded for
    /// today), or the last scan is at least `startup_threshold` old. A
    /// recorded time in the future counts as stale.
    pub fn startup_scan_due(&self, meta: &ScanMetadata, now: DateTime<Local>) -> bool {
        match meta.last_check_time {
            None => meta.last_check_date != Some(now.date_naive()),
            Some(last) if last > now => true,
            Some(last) => now - last >= self.startup_threshold,
        }
    }
}

type Clock<'a> = Box<dyn Fn() -> DateTime<Local> + 'a>;
type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;

/// Drives the monitor from the daily schedule.
pub struct Scheduler<'a> {
    monitor: &'a Monitor,
    schedule: DailySchedule,
    state: SchedulerState,
    clock: Clock<'a>,
    sleep: Sleeper<'a>,
}

impl<'a> Scheduler<'a> {
    pub fn new(monitor: &'a Monitor, schedule: DailySchedule) -> Self {
        Self {
            monitor,
            schedule,
            state: SchedulerState::Idle,
            clock: Box::new(Local::now),
            sleep: Box::new(thread::sleep),
        }
    }

    /// Replaces the wall clock and the sleep between wake-ups.
    pub fn with_clock<C, S>(mut self, clock: C, sleep: S) -> Self
    where
        C: Fn() -> DateTime<Local> + 'a,
        S: FnMut(Duration) + 'a,
    {
        self.clock = Box::new(clock);
        self.sleep = Box::new(sleep);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn metadata(&self) -> ScanMetadata {
        self.monitor.metadata().unwrap_or_else(|e| {
            warn!(error = %e, "cannot read scan metadata; treating as empty");
            ScanMetadata::default()
        })
    }

    /// Runs the startup scan if the last one is stale. Returns whether it ran.
    pub fn startup(&mut self) -> bool {
        let now = (self.clock)();
        let meta = self.metadata();
        if !self.schedule.startup_scan_due(&meta, now) {
            info!(
                last_check = ?meta.last_check_time,
                "recent scan found; skipping startup scan"
            );
            return false;
        }
        self.fire(Trigger::Startup);
        true
    }

    /// Startup check, then the daily loop until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.startup();

        let mut due = self.schedule.first_due((self.clock)());
        info!(next = %due, "scheduler started");

        while !shutdown.load(Ordering::Relaxed) {
            let now = (self.clock)();
            let meta = if now < due {
                ScanMetadata::default()
            } else {
                self.metadata()
            };

            match self.schedule.on_wake(due, now, &meta) {
                FireDecision::Wait(wait) => {
                    let step = wait.min(MAX_SLEEP_STEP);
                    debug!(?step, "sleeping until next scan");
                    (self.sleep)(step);
                }
                FireDecision::Fire => {
                    self.state = SchedulerState::Due;
                    self.fire(Trigger::Scheduled);
                    due = self.schedule.next_fire_after((self.clock)());
                    info!(next = %due, "next scan scheduled");
                }
                FireDecision::Coalesce => {
                    info!(missed = %due, "scan slot coalesced");
                    due = self.schedule.next_fire_after(now);
                    info!(next = %due, "next scan scheduled");
                }
            }
        }
        info!("scheduler stopped");
    }

    fn fire(&mut self, trigger: Trigger) {
        self.state = SchedulerState::Running;
        match self.monitor.run_scan(trigger) {
            Ok(summary) => info!(%trigger, message = %summary.message, "scan complete"),
            Err(e) if e.is_busy() => warn!(%trigger, "scan skipped: another scan is running"),
            Err(e) => error!(%trigger, error = %e, "scan failed"),
        }
        self.state = SchedulerState::Idle;
    }
}

impl fmt::Debug for Scheduler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("monitor", self.monitor)
            .field("schedule", &self.schedule)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
