use crate::application::difficulty::DifficultySelector;
use crate::application::reconciliation::{
    ReconcileOutcome, ReconciliationEngine, ReconciliationPolicy,
};
use crate::domain::models::{
    ActivityRecord, ConfirmedState, Difficulty, EntityType, SelectionMode, ToggleState,
    COMPLETION_STATUS_COMPLETE,
};
use crate::infrastructure::activity_store::ActivityStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
pub type IdentityProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;
type ToggleCallback = Arc<dyn Fn(bool) + Send + Sync>;
type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Please log in to track your practice.")]
    NotAuthenticated,
    #[error("Nothing to track: entity id is missing.")]
    MissingEntity,
    #[error("An update for this entry is already in progress.")]
    OperationInFlight,
    #[error("{0}")]
    RemoteCreateFailed(String),
    #[error("{0}")]
    RemoteDeleteFailed(String),
    #[error("Could not load today's activity: {0}")]
    CheckFailed(String),
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub entity_id: String,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub selection_mode: SelectionMode,
    pub additional_data: Map<String, Value>,
}

impl TrackerOptions {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            entity_type,
            selection_mode: SelectionMode::Card,
            additional_data: Map::new(),
        }
    }

    pub fn with_selection_mode(mut self, selection_mode: SelectionMode) -> Self {
        self.selection_mode = selection_mode;
        self
    }

    pub fn with_additional_data(mut self, additional_data: Map<String, Value>) -> Self {
        self.additional_data = additional_data;
        self
    }
}

#[derive(Clone, Default)]
pub struct ActivityCallbacks {
    on_activity_toggle: Option<ToggleCallback>,
    on_activity_refresh: Option<RefreshCallback>,
}

impl ActivityCallbacks {
    pub fn on_toggle(mut self, callback: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_activity_toggle = Some(Arc::new(callback));
        self
    }

    pub fn on_refresh(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_activity_refresh = Some(Arc::new(callback));
        self
    }

    fn fire(&self, is_tracked: bool) {
        if let Some(callback) = &self.on_activity_toggle {
            callback(is_tracked);
        }
        if let Some(callback) = &self.on_activity_refresh {
            callback();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationDiagnostics {
    pub mismatches: u32,
    pub failures: u32,
    pub last_issue: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Check,
    Mutation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileKind {
    AfterCreate,
    AfterDelete,
}

#[derive(Debug, Clone, Copy)]
struct Prior {
    checked: bool,
    difficulty: Option<Difficulty>,
}

#[derive(Debug, Default)]
struct TrackerState {
    checked: bool,
    error: Option<String>,
    selector: DifficultySelector,
    pending: Option<Pending>,
    confirmed: ConfirmedState,
    diagnostics: ReconciliationDiagnostics,
}

impl TrackerState {
    fn visible(&self) -> ToggleState {
        ToggleState {
            checked: self.checked,
            loading: self.pending.is_some(),
            error: self.error.clone(),
            selected_difficulty: self.selector.selected(),
        }
    }
}

/// State shared with background reconciliation. `epoch` advances on every
/// mutation and on detach; results tagged with an older epoch are dropped.
#[derive(Debug, Default)]
struct Shared {
    state: Mutex<TrackerState>,
    epoch: AtomicU64,
    detached: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.detached.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn apply_reconciliation(
        &self,
        epoch: u64,
        kind: ReconcileKind,
        outcome: ReconcileOutcome,
        now: DateTime<Utc>,
    ) {
        if !self.is_current(epoch) {
            debug!(?kind, "dropping reconciliation result for superseded mutation");
            return;
        }
        let mut state = self.lock();
        match outcome {
            ReconcileOutcome::Confirmed(snapshot) => {
                state.confirmed = ConfirmedState {
                    checked: kind == ReconcileKind::AfterCreate,
                    difficulty: snapshot.and_then(|snapshot| snapshot.difficulty),
                    confirmed_at: Some(now),
                };
            }
            ReconcileOutcome::Mismatch { attempts } => {
                state.diagnostics.mismatches += 1;
                state.diagnostics.last_issue = Some(format!(
                    "{kind:?}: store disagrees after {attempts} read(s)"
                ));
            }
            ReconcileOutcome::Failed(message) => {
                warn!(?kind, error = %message, "reconciliation reads failed");
                state.diagnostics.failures += 1;
                state.diagnostics.last_issue = Some(message);
            }
        }
    }
}

/// Optimistic "practiced today" toggle for one entity and one viewer.
pub struct ToggleController<S>
where
    S: ActivityStore + 'static,
{
    options: TrackerOptions,
    store: Arc<S>,
    reconciler: Arc<ReconciliationEngine<S>>,
    identity: IdentityProvider,
    callbacks: ActivityCallbacks,
    now_provider: NowProvider,
    timezone: Tz,
    shared: Arc<Shared>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<S> ToggleController<S>
where
    S: ActivityStore + 'static,
{
    pub fn new(options: TrackerOptions, store: Arc<S>, identity: IdentityProvider) -> Self {
        Self {
            options,
            reconciler: Arc::new(ReconciliationEngine::new(Arc::clone(&store))),
            store,
            identity,
            callbacks: ActivityCallbacks::default(),
            now_provider: Arc::new(Utc::now),
            timezone: Tz::UTC,
            shared: Arc::new(Shared::default()),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn with_callbacks(mut self, callbacks: ActivityCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_reconciliation_policy(mut self, policy: ReconciliationPolicy) -> Self {
        self.reconciler =
            Arc::new(ReconciliationEngine::new(Arc::clone(&self.store)).with_policy(policy));
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now_provider(&self) -> NowProvider {
        Arc::clone(&self.now_provider)
    }

    pub fn state(&self) -> ToggleState {
        self.shared.lock().visible()
    }

    /// Last state read back from the store, independent of optimistic edits.
    pub fn confirmed(&self) -> ConfirmedState {
        self.shared.lock().confirmed.clone()
    }

    pub fn diagnostics(&self) -> ReconciliationDiagnostics {
        self.shared.lock().diagnostics.clone()
    }

    /// Asks the store whether today's activity exists and adopts the answer.
    /// Skipped while a mutation is pending; a result that races with a newer
    /// mutation is dropped.
    pub async fn check_today(&self) -> Result<ToggleState, TrackerError> {
        let Some(user_id) = self.resolve_user() else {
            let mut state = self.shared.lock();
            state.checked = false;
            state.selector.clear();
            return Ok(state.visible());
        };
        if self.options.entity_id.trim().is_empty() {
            return Err(TrackerError::MissingEntity);
        }

        let epoch = {
            let mut state = self.shared.lock();
            if state.pending == Some(Pending::Mutation) {
                debug!(entity_id = %self.options.entity_id, "existence check skipped during mutation");
                return Ok(state.visible());
            }
            state.pending = Some(Pending::Check);
            self.shared.epoch.load(Ordering::SeqCst)
        };

        let result = self
            .store
            .check_activity(&user_id, &self.options.entity_id)
            .await;
        let now = (self.now_provider)();

        let mut state = self.shared.lock();
        if !self.shared.is_current(epoch) {
            if state.pending == Some(Pending::Check) {
                state.pending = None;
            }
            return Ok(state.visible());
        }
        state.pending = None;
        match result {
            Ok(check) => {
                let active = check.active_today(now, self.timezone);
                let difficulty = active.as_ref().and_then(|snapshot| snapshot.difficulty);
                state.checked = active.is_some();
                state.selector = DifficultySelector::new(difficulty);
                state.confirmed = ConfirmedState {
                    checked: active.is_some(),
                    difficulty,
                    confirmed_at: Some(now),
                };
                debug!(
                    entity_id = %self.options.entity_id,
                    checked = state.checked,
                    "existence check applied"
                );
                Ok(state.visible())
            }
            Err(error) => {
                warn!(entity_id = %self.options.entity_id, error = %error, "existence check failed");
                Err(TrackerError::CheckFailed(error.to_string()))
            }
        }
    }

    /// Records today's practice. When already checked the existing entry is
    /// deleted first so the store never holds two entries for the same day.
    pub async fn toggle_on(&self, difficulty: Option<Difficulty>) -> Result<(), TrackerError> {
        let user_id = self.authorize()?;
        let (epoch, mut prior) = self.begin_mutation(|state| {
            let difficulty = difficulty.or(state.selector.selected());
            state.checked = true;
            state.selector = DifficultySelector::new(difficulty);
        })?;
        let difficulty = self.shared.lock().selector.selected();
        let entity_id = self.options.entity_id.as_str();

        if prior.checked {
            info!(entity_id, "replacing today's activity");
            if let Err(error) = self.store.delete_activity(&user_id, entity_id).await {
                return Err(self.fail_mutation(prior, TrackerError::RemoteDeleteFailed(error.to_string())));
            }
            prior = Prior {
                checked: false,
                difficulty: None,
            };
        }

        let record = self.build_record(&user_id, difficulty);
        if let Err(error) = self.store.create_activity(&record).await {
            return Err(self.fail_mutation(prior, TrackerError::RemoteCreateFailed(error.to_string())));
        }

        info!(entity_id, difficulty = ?difficulty, "activity recorded");
        self.complete_mutation(true);
        self.spawn_reconciliation(user_id, epoch, ReconcileKind::AfterCreate);
        Ok(())
    }

    pub async fn toggle_off(&self) -> Result<(), TrackerError> {
        let user_id = self.authorize()?;
        let (epoch, prior) = self.begin_mutation(|state| {
            state.checked = false;
            state.selector.clear();
        })?;
        let entity_id = self.options.entity_id.as_str();

        if let Err(error) = self.store.delete_activity(&user_id, entity_id).await {
            return Err(self.fail_mutation(prior, TrackerError::RemoteDeleteFailed(error.to_string())));
        }

        info!(entity_id, "activity removed");
        self.complete_mutation(false);
        self.spawn_reconciliation(user_id, epoch, ReconcileKind::AfterDelete);
        Ok(())
    }

    /// Checkbox semantics: flips the current visible state.
    pub async fn toggle(&self) -> Result<(), TrackerError> {
        if self.state().checked {
            self.toggle_off().await
        } else {
            self.toggle_on(None).await
        }
    }

    /// In card mode only the local selection changes. In chips mode each
    /// selection is persisted, and clearing it removes today's entry.
    pub async fn select_difficulty(&self, difficulty: Difficulty) -> Result<ToggleState, TrackerError> {
        if !self.options.selection_mode.persists_on_select() {
            let mut state = self.shared.lock();
            state.selector.select(difficulty);
            return Ok(state.visible());
        }

        let next = {
            let mut selector = self.shared.lock().selector;
            selector.select(difficulty)
        };
        match next {
            Some(difficulty) => self.toggle_on(Some(difficulty)).await?,
            None => self.toggle_off().await?,
        }
        Ok(self.state())
    }

    /// Waits for reconciliation tasks spawned so far.
    pub async fn settle(&self) {
        let handles = {
            let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *background)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Marks the controller as torn down. Reconciliation still in flight
    /// completes but its result is ignored.
    pub fn detach(&self) {
        self.shared.detached.store(true, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::SeqCst)
    }

    fn resolve_user(&self) -> Option<String> {
        (self.identity)()
            .map(|user_id| user_id.trim().to_string())
            .filter(|user_id| !user_id.is_empty())
    }

    fn authorize(&self) -> Result<String, TrackerError> {
        let Some(user_id) = self.resolve_user() else {
            warn!(entity_id = %self.options.entity_id, "toggle attempted without a user");
            let mut state = self.shared.lock();
            state.checked = false;
            state.error = Some(TrackerError::NotAuthenticated.to_string());
            return Err(TrackerError::NotAuthenticated);
        };
        if self.options.entity_id.trim().is_empty() {
            self.shared.lock().error = Some(TrackerError::MissingEntity.to_string());
            return Err(TrackerError::MissingEntity);
        }
        Ok(user_id)
    }

    fn begin_mutation(
        &self,
        optimistic: impl FnOnce(&mut TrackerState),
    ) -> Result<(u64, Prior), TrackerError> {
        let mut state = self.shared.lock();
        if state.pending == Some(Pending::Mutation) {
            return Err(TrackerError::OperationInFlight);
        }
        let prior = Prior {
            checked: state.checked,
            difficulty: state.selector.selected(),
        };
        optimistic(&mut state);
        state.pending = Some(Pending::Mutation);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((epoch, prior))
    }

    fn fail_mutation(&self, prior: Prior, error: TrackerError) -> TrackerError {
        warn!(entity_id = %self.options.entity_id, error = %error, "activity mutation failed");
        let mut state = self.shared.lock();
        state.checked = prior.checked;
        state.selector = DifficultySelector::new(prior.difficulty);
        state.pending = None;
        state.error = Some(error.to_string());
        error
    }

    fn complete_mutation(&self, is_tracked: bool) {
        {
            let mut state = self.shared.lock();
            state.pending = None;
            state.error = None;
        }
        self.callbacks.fire(is_tracked);
    }

    fn build_record(&self, user_id: &str, difficulty: Option<Difficulty>) -> ActivityRecord {
        ActivityRecord {
            user_id: user_id.to_string(),
            entity_id: self.options.entity_id.clone(),
            entity_type: self.options.entity_type,
            entity_name: self.options.entity_name.clone(),
            difficulty,
            completion_status: COMPLETION_STATUS_COMPLETE.to_string(),
            date_performed: (self.now_provider)(),
            additional_data: self.options.additional_data.clone(),
        }
    }

    fn spawn_reconciliation(&self, user_id: String, epoch: u64, kind: ReconcileKind) {
        let engine = Arc::clone(&self.reconciler);
        let shared = Arc::clone(&self.shared);
        let now_provider = Arc::clone(&self.now_provider);
        let timezone = self.timezone;
        let entity_id = self.options.entity_id.clone();

        let handle = tokio::spawn(async move {
            let now = now_provider();
            let outcome = match kind {
                ReconcileKind::AfterCreate => {
                    engine
                        .reconcile_after_create(&user_id, &entity_id, now, timezone)
                        .await
                }
                ReconcileKind::AfterDelete => {
                    engine
                        .reconcile_after_delete(&user_id, &entity_id, now, timezone)
                        .await
                }
            };
            shared.apply_reconciliation(epoch, kind, outcome, now_provider());
        });

        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.retain(|handle| !handle.is_finished());
        background.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{FakeActivityStore, StoreCall};
    use std::sync::atomic::AtomicUsize;

    const USER: &str = "user-1";
    const ENTITY: &str = "abc";

    fn signed_in() -> IdentityProvider {
        Arc::new(|| Some(USER.to_string()))
    }

    fn signed_out() -> IdentityProvider {
        Arc::new(|| None)
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T07:30:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn controller(
        store: &Arc<FakeActivityStore>,
        mode: SelectionMode,
        identity: IdentityProvider,
    ) -> ToggleController<FakeActivityStore> {
        let options = TrackerOptions::new(EntityType::Asana, ENTITY, "Downward Dog")
            .with_selection_mode(mode);
        ToggleController::new(options, Arc::clone(store), identity)
            .with_now_provider(Arc::new(fixed_time))
    }

    #[derive(Default)]
    struct CallbackCounts {
        toggled_on: AtomicUsize,
        toggled_off: AtomicUsize,
        refreshed: AtomicUsize,
    }

    fn counting_callbacks(counts: &Arc<CallbackCounts>) -> ActivityCallbacks {
        let toggles = Arc::clone(counts);
        let refreshes = Arc::clone(counts);
        ActivityCallbacks::default()
            .on_toggle(move |is_tracked| {
                let counter = if is_tracked {
                    &toggles.toggled_on
                } else {
                    &toggles.toggled_off
                };
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_refresh(move || {
                refreshes.refreshed.fetch_add(1, Ordering::SeqCst);
            })
    }

    async fn wait_for_mutation_call(store: &FakeActivityStore) {
        while store.mutation_calls().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn unauthenticated_toggle_never_reaches_store() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_out());

        let result = controller.toggle_on(Some(Difficulty::Easy)).await;
        assert_eq!(result, Err(TrackerError::NotAuthenticated));
        let result = controller.toggle_off().await;
        assert_eq!(result, Err(TrackerError::NotAuthenticated));

        let state = controller.state();
        assert!(!state.checked);
        assert!(state.error.as_deref().unwrap_or_default().starts_with("Please log in"));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn toggle_on_is_optimistic_and_fires_callbacks_once() {
        let store = Arc::new(FakeActivityStore::default());
        let counts = Arc::new(CallbackCounts::default());
        let controller = controller(&store, SelectionMode::Card, signed_in())
            .with_callbacks(counting_callbacks(&counts));
        store.pause_mutations();

        let (result, ()) = tokio::join!(controller.toggle_on(Some(Difficulty::Average)), async {
            wait_for_mutation_call(&store).await;
            let pending = controller.state();
            assert!(pending.checked);
            assert!(pending.loading);
            assert_eq!(pending.selected_difficulty, Some(Difficulty::Average));
            store.release_mutations();
        });
        result.expect("toggle on succeeds");

        let created = store.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].difficulty, Some(Difficulty::Average));
        assert_eq!(created[0].completion_status, "complete");
        assert_eq!(created[0].date_performed, fixed_time());
        assert_eq!(counts.toggled_on.load(Ordering::SeqCst), 1);
        assert_eq!(counts.refreshed.load(Ordering::SeqCst), 1);

        controller.settle().await;
        let confirmed = controller.confirmed();
        assert!(confirmed.checked);
        assert_eq!(confirmed.difficulty, Some(Difficulty::Average));
    }

    #[tokio::test]
    async fn replace_deletes_then_creates_one_at_a_time() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, Some(Difficulty::Easy));
        let controller = controller(&store, SelectionMode::Chips, signed_in());

        let loaded = controller.check_today().await.expect("check succeeds");
        assert!(loaded.checked);
        assert_eq!(loaded.selected_difficulty, Some(Difficulty::Easy));

        let state = controller
            .select_difficulty(Difficulty::Difficult)
            .await
            .expect("replace succeeds");

        assert_eq!(
            store.mutation_calls(),
            vec![
                StoreCall::Delete(ENTITY.to_string()),
                StoreCall::Create(ENTITY.to_string(), Some(Difficulty::Difficult)),
            ]
        );
        assert_eq!(store.max_in_flight(), 1);
        assert_eq!(store.record_count(USER, ENTITY), 1);
        assert_eq!(state.difficulty_slots(), [false, false, true]);
    }

    #[tokio::test]
    async fn create_failure_rolls_back_and_next_success_clears_error() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        store.fail_next_create("Network error");

        let result = controller.toggle_on(None).await;
        assert_eq!(
            result,
            Err(TrackerError::RemoteCreateFailed("Network error".to_string()))
        );
        let state = controller.state();
        assert!(!state.checked);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Network error"));

        controller.toggle_on(None).await.expect("retry succeeds");
        let state = controller.state();
        assert!(state.checked);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn delete_failure_restores_checked_and_selection() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, Some(Difficulty::Average));
        let counts = Arc::new(CallbackCounts::default());
        let controller = controller(&store, SelectionMode::Card, signed_in())
            .with_callbacks(counting_callbacks(&counts));
        controller.check_today().await.expect("check succeeds");
        store.fail_next_delete("Server unavailable");

        let result = controller.toggle_off().await;

        assert_eq!(
            result,
            Err(TrackerError::RemoteDeleteFailed("Server unavailable".to_string()))
        );
        let state = controller.state();
        assert!(state.checked);
        assert_eq!(state.selected_difficulty, Some(Difficulty::Average));
        assert_eq!(state.error.as_deref(), Some("Server unavailable"));
        assert_eq!(counts.toggled_off.load(Ordering::SeqCst), 0);
        assert_eq!(counts.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_failure_after_replace_delete_leaves_unchecked() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, Some(Difficulty::Easy));
        let controller = controller(&store, SelectionMode::Card, signed_in());
        controller.check_today().await.expect("check succeeds");
        store.fail_next_create("quota exceeded");

        let result = controller.toggle_on(Some(Difficulty::Average)).await;

        assert!(matches!(result, Err(TrackerError::RemoteCreateFailed(_))));
        let state = controller.state();
        assert!(!state.checked);
        assert_eq!(state.selected_difficulty, None);
        assert_eq!(store.record_count(USER, ENTITY), 0);
    }

    #[tokio::test]
    async fn on_then_off_returns_to_initial_state() {
        let store = Arc::new(FakeActivityStore::default());
        let counts = Arc::new(CallbackCounts::default());
        let controller = controller(&store, SelectionMode::Card, signed_in())
            .with_callbacks(counting_callbacks(&counts));

        controller.toggle_on(Some(Difficulty::Easy)).await.expect("on");
        controller.toggle_off().await.expect("off");
        controller.settle().await;

        let state = controller.state();
        assert!(!state.checked);
        assert_eq!(state.selected_difficulty, None);
        assert_eq!(state.error, None);
        assert_eq!(counts.toggled_on.load(Ordering::SeqCst), 1);
        assert_eq!(counts.toggled_off.load(Ordering::SeqCst), 1);
        assert_eq!(counts.refreshed.load(Ordering::SeqCst), 2);
        assert!(!controller.confirmed().checked);
    }

    #[tokio::test]
    async fn card_mode_selection_stays_local_until_toggle() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());

        controller
            .select_difficulty(Difficulty::Difficult)
            .await
            .expect("local select");
        assert!(store.calls().is_empty());
        assert!(!controller.state().checked);

        controller.toggle().await.expect("toggle on");
        assert_eq!(
            store.mutation_calls(),
            vec![StoreCall::Create(ENTITY.to_string(), Some(Difficulty::Difficult))]
        );
    }

    #[tokio::test]
    async fn chips_mode_clearing_selection_deletes() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Chips, signed_in());

        controller.select_difficulty(Difficulty::Easy).await.expect("select");
        let state = controller.select_difficulty(Difficulty::Easy).await.expect("clear");

        assert!(!state.checked);
        assert_eq!(
            store.mutation_calls(),
            vec![
                StoreCall::Create(ENTITY.to_string(), Some(Difficulty::Easy)),
                StoreCall::Delete(ENTITY.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn second_mutation_is_rejected_while_first_is_pending() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        store.pause_mutations();

        let (first, second) = tokio::join!(controller.toggle_on(None), async {
            wait_for_mutation_call(&store).await;
            let result = controller.toggle_off().await;
            store.release_mutations();
            result
        });

        first.expect("first toggle succeeds");
        assert_eq!(second, Err(TrackerError::OperationInFlight));
        assert_eq!(store.mutation_calls().len(), 1);
        assert!(controller.state().checked);
    }

    #[tokio::test]
    async fn reconciliation_mismatch_is_diagnostic_only() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        store.hide_next_reads(3);

        controller.toggle_on(Some(Difficulty::Easy)).await.expect("on");
        controller.settle().await;

        let state = controller.state();
        assert!(state.checked);
        assert_eq!(state.error, None);
        assert_eq!(store.check_count(), 3);
        assert_eq!(controller.diagnostics().mismatches, 1);
        assert!(!controller.confirmed().checked);
    }

    #[tokio::test]
    async fn lagging_delete_does_not_revert() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, None);
        let controller = controller(&store, SelectionMode::Card, signed_in());
        controller.check_today().await.expect("check");
        store.fail_next_delete("transient");
        let _ = controller.toggle_off().await;
        // The retry succeeds remotely but the record is re-seeded to mimic a stale read.
        controller.toggle_off().await.expect("off");
        store.seed(USER, ENTITY, None);
        controller.settle().await;

        assert!(!controller.state().checked);
        assert_eq!(controller.diagnostics().mismatches, 1);
    }

    #[tokio::test]
    async fn detached_controller_ignores_late_reconciliation() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());

        controller.toggle_on(None).await.expect("on");
        controller.detach();
        controller.settle().await;

        assert_eq!(controller.confirmed(), ConfirmedState::default());
        assert_eq!(controller.diagnostics(), ReconciliationDiagnostics::default());
    }

    #[tokio::test]
    async fn check_failure_keeps_state_and_hides_error() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        store.fail_next_checks(1, "timeout");

        let result = controller.check_today().await;

        assert_eq!(result, Err(TrackerError::CheckFailed("timeout".to_string())));
        let state = controller.state();
        assert!(!state.loading);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn unauthenticated_check_forces_unchecked_without_call() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, Some(Difficulty::Easy));
        let controller = controller(&store, SelectionMode::Card, signed_out());

        let state = controller.check_today().await.expect("no-op check");

        assert!(!state.checked);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn blank_entity_is_rejected_before_network() {
        let store = Arc::new(FakeActivityStore::default());
        let options = TrackerOptions::new(EntityType::Sequence, "  ", "Unnamed");
        let controller = ToggleController::new(options, Arc::clone(&store), signed_in());

        assert_eq!(controller.toggle_on(None).await, Err(TrackerError::MissingEntity));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn additional_data_is_merged_into_payload() {
        let store = Arc::new(FakeActivityStore::default());
        let mut extra = Map::new();
        extra.insert("sessionLength".to_string(), Value::from(45));
        let options = TrackerOptions::new(EntityType::Series, ENTITY, "Hip Openers")
            .with_additional_data(extra);
        let controller = ToggleController::new(options, Arc::clone(&store), signed_in());

        controller.toggle_on(None).await.expect("on");

        let payload = store.created()[0].to_payload();
        assert_eq!(payload.get("sessionLength"), Some(&Value::from(45)));
        assert_eq!(payload.get("seriesId"), Some(&Value::String(ENTITY.to_string())));
    }

    #[tokio::test]
    async fn existence_check_is_skipped_while_mutation_pending() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        store.pause_mutations();

        let (result, state) = tokio::join!(controller.toggle_on(Some(Difficulty::Easy)), async {
            wait_for_mutation_call(&store).await;
            let state = controller.check_today().await.expect("skipped check");
            assert_eq!(store.check_count(), 0);
            store.release_mutations();
            state
        });

        result.expect("toggle on succeeds");
        assert!(state.checked);
        assert!(state.loading);
        assert_eq!(state.selected_difficulty, Some(Difficulty::Easy));
    }

    #[tokio::test]
    async fn reconciliation_of_superseded_mutation_is_dropped() {
        let store = Arc::new(FakeActivityStore::default());
        let controller = controller(&store, SelectionMode::Card, signed_in());
        controller.toggle_on(Some(Difficulty::Average)).await.expect("on");
        store.pause_mutations();

        let (result, ()) = tokio::join!(controller.toggle_off(), async {
            while store.mutation_calls().len() < 2 {
                tokio::task::yield_now().await;
            }
            // The create's read-back lands while the delete is still pending.
            controller.settle().await;
            assert_eq!(store.check_count(), 1);
            assert_eq!(controller.confirmed(), ConfirmedState::default());
            assert_eq!(controller.diagnostics(), ReconciliationDiagnostics::default());
            store.release_mutations();
        });

        result.expect("off");
        assert!(!controller.state().checked);
    }

    #[tokio::test]
    async fn detaching_during_check_clears_loading() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed(USER, ENTITY, Some(Difficulty::Easy));
        let controller = controller(&store, SelectionMode::Card, signed_in());

        let (result, ()) = tokio::join!(controller.check_today(), async {
            controller.detach();
        });

        let state = result.expect("check completes");
        assert!(!state.loading);
        assert!(!state.checked);
        assert!(!controller.state().loading);
    }

    #[tokio::test]
    async fn stale_record_from_yesterday_is_not_today() {
        let store = Arc::new(FakeActivityStore::default());
        store.seed_on(
            USER,
            ENTITY,
            Some(Difficulty::Difficult),
            fixed_time() - chrono::Duration::days(1),
        );
        let controller = controller(&store, SelectionMode::Card, signed_in());

        let state = controller.check_today().await.expect("check succeeds");

        assert!(!state.checked);
        assert_eq!(state.selected_difficulty, None);
    }
}
