use crate::application::scoped_task::ScopedTask;
use crate::application::toggle_controller::NowProvider;
use crate::domain::models::local_date;
use crate::infrastructure::config::MAX_DAY_POLL_SECONDS;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Remembers the local date seen at the previous poll.
#[derive(Debug, Clone)]
pub struct DayTracker {
    timezone: Tz,
    last_seen: Option<NaiveDate>,
}

impl DayTracker {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            last_seen: None,
        }
    }

    /// True when the local date differs from the previous observation. The
    /// first observation only records the baseline.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        let today = local_date(now, self.timezone);
        let rolled_over = self.last_seen.is_some_and(|previous| previous != today);
        self.last_seen = Some(today);
        rolled_over
    }

    pub fn last_seen(&self) -> Option<NaiveDate> {
        self.last_seen
    }
}

pub struct DayBoundaryScheduler {
    poll_interval: Duration,
    timezone: Tz,
    now_provider: NowProvider,
}

impl DayBoundaryScheduler {
    pub fn new(timezone: Tz) -> Self {
        Self {
            poll_interval: Duration::from_secs(MAX_DAY_POLL_SECONDS),
            timezone,
            now_provider: Arc::new(Utc::now),
        }
    }

    /// Intervals coarser than one minute are clamped to one minute.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval
            .min(Duration::from_secs(MAX_DAY_POLL_SECONDS))
            .max(Duration::from_millis(1));
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Starts polling; `on_rollover` runs to completion before the next poll.
    pub fn start<F, Fut>(self, on_rollover: F) -> ScopedTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Self {
            poll_interval,
            timezone,
            now_provider,
        } = self;

        ScopedTask::spawn("day-boundary", async move {
            let mut tracker = DayTracker::new(timezone);
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tracker.observe(now_provider()) {
                    info!(date = ?tracker.last_seen(), "local day rolled over");
                    on_rollover().await;
                }
            }
        })
    }
}
