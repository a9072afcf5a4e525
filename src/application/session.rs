use crate::application::day_boundary::DayBoundaryScheduler;
use crate::application::invalidation::{InvalidationFilter, InvalidationListener};
use crate::application::scoped_task::ScopedTask;
use crate::application::toggle_controller::ToggleController;
use crate::infrastructure::activity_store::ActivityStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A mounted tracker: owns the controller together with the day-boundary
/// poll and the invalidation subscription that refresh it.
pub struct TrackerSession<S>
where
    S: ActivityStore + 'static,
{
    controller: Arc<ToggleController<S>>,
    day_boundary: Option<ScopedTask>,
    invalidation: Option<ScopedTask>,
}

impl<S> TrackerSession<S>
where
    S: ActivityStore + 'static,
{
    pub async fn mount(
        controller: Arc<ToggleController<S>>,
        scheduler: DayBoundaryScheduler,
        invalidations: Option<broadcast::Receiver<Value>>,
    ) -> Self {
        let entity_id = controller.options().entity_id.clone();
        if let Err(error) = controller.check_today().await {
            warn!(entity_id = %entity_id, error = %error, "initial existence check failed");
        }

        let refresh_on_rollover = Arc::clone(&controller);
        let day_boundary = scheduler.start(move || {
            let controller = Arc::clone(&refresh_on_rollover);
            async move {
                if let Err(error) = controller.check_today().await {
                    warn!(error = %error, "existence check after day rollover failed");
                }
            }
        });

        let invalidation = invalidations.map(|receiver| {
            let filter = InvalidationFilter::new(controller.options().entity_type, entity_id.clone());
            let refresh_on_invalidate = Arc::clone(&controller);
            InvalidationListener::start(receiver, filter, move || {
                let controller = Arc::clone(&refresh_on_invalidate);
                async move {
                    if let Err(error) = controller.check_today().await {
                        warn!(error = %error, "existence check after invalidation failed");
                    }
                }
            })
        });

        info!(entity_id = %entity_id, "tracker mounted");
        Self {
            controller,
            day_boundary: Some(day_boundary),
            invalidation,
        }
    }

    pub fn controller(&self) -> &Arc<ToggleController<S>> {
        &self.controller
    }

    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let tasks = [self.day_boundary.take(), self.invalidation.take()];
        if tasks.iter().all(Option::is_none) {
            return;
        }
        for task in tasks.into_iter().flatten() {
            debug!(task = task.name(), "releasing tracker subscription");
            task.cancel();
        }
        self.controller.detach();
        info!(entity_id = %self.controller.options().entity_id, "tracker unmounted");
    }
}

impl<S> Drop for TrackerSession<S>
where
    S: ActivityStore + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
