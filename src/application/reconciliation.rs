use crate::domain::models::ActivitySnapshot;
use crate::infrastructure::activity_store::ActivityStore;
use crate::infrastructure::config::ReconciliationSettings;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, warn};

/// Bounds the post-create confirmation loop: one check plus
/// `max_attempts - 1` sequential retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPolicy {
    pub max_attempts: u8,
    pub retry_delay_ms: u64,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 0,
        }
    }
}

impl From<&ReconciliationSettings> for ReconciliationPolicy {
    fn from(settings: &ReconciliationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The store agrees with the mutation. Carries the record after a create.
    Confirmed(Option<ActivitySnapshot>),
    /// The store still disagrees after `attempts` reads.
    Mismatch { attempts: u8 },
    /// Every read failed; the last error message is kept.
    Failed(String),
}

pub struct ReconciliationEngine<S>
where
    S: ActivityStore,
{
    store: Arc<S>,
    policy: ReconciliationPolicy,
}

impl<S> ReconciliationEngine<S>
where
    S: ActivityStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: ReconciliationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconciliationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// Only a record dated on the local day of `now` counts as present; a
    /// leftover from an earlier day does not confirm today's create.
    pub async fn reconcile_after_create(
        &self,
        user_id: &str,
        entity_id: &str,
        now: DateTime<Utc>,
        timezone: Tz,
    ) -> ReconcileOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        let last_error = loop {
            attempt = attempt.saturating_add(1);
            let read_error = match self.store.check_activity(user_id, entity_id).await {
                Ok(check) => match check.active_today(now, timezone) {
                    Some(snapshot) => {
                        debug!(entity_id, attempt, "create confirmed by store");
                        return ReconcileOutcome::Confirmed(Some(snapshot));
                    }
                    None => None,
                },
                Err(error) => Some(error.to_string()),
            };

            if attempt >= max_attempts {
                break read_error;
            }
            if self.policy.retry_delay_ms > 0 {
                sleep(TokioDuration::from_millis(self.policy.retry_delay_ms)).await;
            }
        };

        match last_error {
            Some(message) => ReconcileOutcome::Failed(message),
            None => {
                warn!(
                    entity_id,
                    attempts = attempt,
                    "created activity not visible after retries"
                );
                ReconcileOutcome::Mismatch { attempts: attempt }
            }
        }
    }

    pub async fn reconcile_after_delete(
        &self,
        user_id: &str,
        entity_id: &str,
        now: DateTime<Utc>,
        timezone: Tz,
    ) -> ReconcileOutcome {
        match self.store.check_activity(user_id, entity_id).await {
            Ok(check) if check.active_today(now, timezone).is_some() => {
                warn!(entity_id, "deleted activity still visible in store");
                ReconcileOutcome::Mismatch { attempts: 1 }
            }
            Ok(_) => ReconcileOutcome::Confirmed(None),
            Err(error) => ReconcileOutcome::Failed(error.to_string()),
        }
    }
}
