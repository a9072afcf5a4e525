pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::day_boundary::{DayBoundaryScheduler, DayTracker};
pub use application::difficulty::DifficultySelector;
pub use application::invalidation::{
    InvalidationFilter, InvalidationHub, InvalidationListener, InvalidationMessage,
};
pub use application::reconciliation::{ReconcileOutcome, ReconciliationEngine, ReconciliationPolicy};
pub use application::scoped_task::ScopedTask;
pub use application::session::TrackerSession;
pub use application::toggle_controller::{
    ActivityCallbacks, IdentityProvider, NowProvider, ReconciliationDiagnostics, ToggleController,
    TrackerError, TrackerOptions,
};
pub use domain::models::{
    ActivityCheck, ActivityRecord, ActivitySnapshot, ConfirmedState, Difficulty, EntityType,
    SelectionMode, ToggleState, TrackerPhase,
};
pub use infrastructure::activity_store::{ActivityStore, ReqwestActivityStore};
pub use infrastructure::config::TrackerConfig;
pub use infrastructure::error::InfraError;
