use tokio::task::JoinHandle;

/// Background task owned by a tracker session. Dropping the handle aborts
/// the task, so subscriptions and polls cannot outlive their owner.
#[derive(Debug)]
pub struct ScopedTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScopedTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(task = self.name, "cancelling scoped task");
            handle.abort();
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.abort();
    }
}
