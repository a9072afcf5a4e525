use crate::application::scoped_task::ScopedTask;
use crate::domain::models::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const INVALIDATE_URLS_COMMAND: &str = "INVALIDATE_URLS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub command: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl InvalidationMessage {
    pub fn invalidate_urls(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: INVALIDATE_URLS_COMMAND.to_string(),
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// `None` for anything that is not a well-formed `INVALIDATE_URLS` message.
    pub fn parse(value: &Value) -> Option<Self> {
        let message: Self = serde_json::from_value(value.clone()).ok()?;
        (message.command == INVALIDATE_URLS_COMMAND).then_some(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationFilter {
    path_fragment: &'static str,
    entity_id: String,
}

impl InvalidationFilter {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            path_fragment: entity_type.activity_path(),
            entity_id: entity_id.into(),
        }
    }

    pub fn matches(&self, message: &InvalidationMessage) -> bool {
        if self.entity_id.trim().is_empty() {
            return false;
        }
        message
            .urls
            .iter()
            .filter(|url| url.contains(self.path_fragment))
            .any(|url| url.contains(self.entity_id.as_str()))
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        InvalidationMessage::parse(value).is_some_and(|message| self.matches(&message))
    }
}

/// In-process side of the push channel. Producers publish raw JSON; each
/// mounted tracker holds its own receiver.
#[derive(Debug, Clone)]
pub struct InvalidationHub {
    sender: broadcast::Sender<Value>,
}

impl InvalidationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    /// Returns the number of listeners that received the message.
    pub fn publish(&self, message: Value) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct InvalidationListener;

impl InvalidationListener {
    /// Runs `on_invalidate` for every relevant message until the channel
    /// closes or the returned handle is dropped.
    pub fn start<F, Fut>(
        mut receiver: broadcast::Receiver<Value>,
        filter: InvalidationFilter,
        on_invalidate: F,
    ) -> ScopedTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ScopedTask::spawn("invalidation-listener", async move {
            loop {
                match receiver.recv().await {
                    Ok(value) => {
                        if filter.matches_value(&value) {
                            debug!(entity_id = %filter.entity_id, "invalidation matched tracker");
                            on_invalidate().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "invalidation listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
