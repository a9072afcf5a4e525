use crate::domain::models::{ActivityCheck, ActivityRecord, ActivitySnapshot, Difficulty};
use crate::infrastructure::activity_store::ActivityStore;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Check(String),
    Create(String, Option<Difficulty>),
    Delete(String),
}

/// Scripted in-memory store. Keeps every created record so duplicate
/// same-day entries are observable.
#[derive(Debug, Default)]
pub struct FakeActivityStore {
    records: Mutex<HashMap<(String, String), Vec<ActivitySnapshot>>>,
    calls: Mutex<Vec<StoreCall>>,
    created: Mutex<Vec<ActivityRecord>>,
    hidden_reads: AtomicUsize,
    check_failures: Mutex<VecDeque<String>>,
    create_failures: Mutex<VecDeque<String>>,
    delete_failures: Mutex<VecDeque<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    paused: AtomicBool,
    release: Notify,
}

impl FakeActivityStore {
    pub fn seed(&self, user_id: &str, entity_id: &str, difficulty: Option<Difficulty>) {
        self.push_record(user_id, entity_id, difficulty, None);
    }

    pub fn seed_on(
        &self,
        user_id: &str,
        entity_id: &str,
        difficulty: Option<Difficulty>,
        date_performed: DateTime<Utc>,
    ) {
        self.push_record(user_id, entity_id, difficulty, Some(date_performed));
    }

    fn push_record(
        &self,
        user_id: &str,
        entity_id: &str,
        difficulty: Option<Difficulty>,
        date_performed: Option<DateTime<Utc>>,
    ) {
        self.records
            .lock()
            .expect("records lock")
            .entry((user_id.to_string(), entity_id.to_string()))
            .or_default()
            .push(ActivitySnapshot {
                difficulty,
                completion_status: Some("complete".to_string()),
                date_performed,
                ..ActivitySnapshot::default()
            });
    }

    pub fn clear_records(&self) {
        self.records.lock().expect("records lock").clear();
    }

    pub fn record_count(&self, user_id: &str, entity_id: &str) -> usize {
        self.records
            .lock()
            .expect("records lock")
            .get(&(user_id.to_string(), entity_id.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// The next `count` checks report no record regardless of contents.
    pub fn hide_next_reads(&self, count: usize) {
        self.hidden_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_checks(&self, count: usize, message: &str) {
        let mut failures = self.check_failures.lock().expect("failures lock");
        for _ in 0..count {
            failures.push_back(message.to_string());
        }
    }

    pub fn fail_next_create(&self, message: &str) {
        self.create_failures
            .lock()
            .expect("failures lock")
            .push_back(message.to_string());
    }

    pub fn fail_next_delete(&self, message: &str) {
        self.delete_failures
            .lock()
            .expect("failures lock")
            .push_back(message.to_string());
    }

    /// Blocks create/delete calls until `release_mutations`.
    pub fn pause_mutations(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn release_mutations(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn mutation_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, StoreCall::Check(_)))
            .collect()
    }

    pub fn check_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Check(_)))
            .count()
    }

    pub fn created(&self) -> Vec<ActivityRecord> {
        self.created.lock().expect("created lock").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn push_call(&self, call: StoreCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    async fn enter_mutation(&self) {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if self.paused.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActivityStore for FakeActivityStore {
    async fn check_activity(
        &self,
        user_id: &str,
        entity_id: &str,
    ) -> Result<ActivityCheck, InfraError> {
        self.push_call(StoreCall::Check(entity_id.to_string()));
        tokio::task::yield_now().await;

        if let Some(message) = self.check_failures.lock().expect("failures lock").pop_front() {
            return Err(InfraError::Remote(message));
        }
        let hidden = self
            .hidden_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(ActivityCheck::absent());
        }

        let records = self.records.lock().expect("records lock");
        Ok(records
            .get(&(user_id.to_string(), entity_id.to_string()))
            .and_then(|entries| entries.last().cloned())
            .map(ActivityCheck::present)
            .unwrap_or_else(ActivityCheck::absent))
    }

    async fn create_activity(&self, record: &ActivityRecord) -> Result<(), InfraError> {
        self.push_call(StoreCall::Create(record.entity_id.clone(), record.difficulty));
        self.enter_mutation().await;

        if let Some(message) = self.create_failures.lock().expect("failures lock").pop_front() {
            return Err(InfraError::Remote(message));
        }
        self.created.lock().expect("created lock").push(record.clone());
        self.records
            .lock()
            .expect("records lock")
            .entry((record.user_id.clone(), record.entity_id.clone()))
            .or_default()
            .push(ActivitySnapshot {
                difficulty: record.difficulty,
                completion_status: Some(record.completion_status.clone()),
                date_performed: Some(record.date_performed),
                ..ActivitySnapshot::default()
            });
        Ok(())
    }

    async fn delete_activity(&self, user_id: &str, entity_id: &str) -> Result<(), InfraError> {
        self.push_call(StoreCall::Delete(entity_id.to_string()));
        self.enter_mutation().await;

        if let Some(message) = self.delete_failures.lock().expect("failures lock").pop_front() {
            return Err(InfraError::Remote(message));
        }
        self.records
            .lock()
            .expect("records lock")
            .remove(&(user_id.to_string(), entity_id.to_string()));
        Ok(())
    }
}
