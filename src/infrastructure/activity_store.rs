use crate::domain::models::{ActivityCheck, ActivityRecord, EntityType};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

/// Remote authority for activity records. Implementations own transport,
/// persistence and timeouts.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn check_activity(&self, user_id: &str, entity_id: &str)
        -> Result<ActivityCheck, InfraError>;

    async fn create_activity(&self, record: &ActivityRecord) -> Result<(), InfraError>;

    async fn delete_activity(&self, user_id: &str, entity_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestActivityStore {
    client: Client,
    endpoint: Url,
    entity_type: EntityType,
}

impl ReqwestActivityStore {
    pub fn new(api_base_url: &str, entity_type: EntityType) -> Result<Self, InfraError> {
        Ok(Self {
            client: Client::new(),
            endpoint: Self::activity_endpoint(api_base_url, entity_type)?,
            entity_type,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn activity_endpoint(api_base_url: &str, entity_type: EntityType) -> Result<Url, InfraError> {
        let mut url = Url::parse(api_base_url)?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig(format!("api base url cannot be a base: {api_base_url}"))
            })?;
            segments.pop_if_empty();
            for segment in entity_type.activity_path().split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn identity_query<'a>(&self, user_id: &'a str, entity_id: &'a str) -> [(&'static str, &'a str); 2] {
        [("userId", user_id), (self.entity_type.id_field(), entity_id)]
    }

    async fn read_body(response: reqwest::Response) -> Result<(StatusCode, String), InfraError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading activity response: {error}")))?;
        Ok((status, body))
    }
}

/// Pulls the human readable message out of an error response so it can be
/// shown to the user unchanged.
pub(crate) fn remote_error(status: StatusCode, body: &str) -> InfraError {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"].iter().find_map(|key| {
                value
                    .get(*key)
                    .and_then(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|message| !message.is_empty())
                    .map(ToOwned::to_owned)
            })
        });
    let message = match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_string(),
        None => format!("http {}", status.as_u16()),
    };
    InfraError::Remote(message)
}

#[async_trait]
impl ActivityStore for ReqwestActivityStore {
    async fn check_activity(
        &self,
        user_id: &str,
        entity_id: &str,
    ) -> Result<ActivityCheck, InfraError> {
        Self::ensure_non_empty(user_id, "user id")?;
        Self::ensure_non_empty(entity_id, "entity id")?;

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&self.identity_query(user_id, entity_id))
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("checking activity: {error}")))?;

        let (status, body) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(ActivityCheck::absent());
        }
        if !status.is_success() {
            return Err(remote_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid activity check payload: {error}"))
        })
    }

    async fn create_activity(&self, record: &ActivityRecord) -> Result<(), InfraError> {
        record.validate().map_err(InfraError::InvalidConfig)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&record.to_payload())
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("creating activity: {error}")))?;

        let (status, body) = Self::read_body(response).await?;
        if !status.is_success() {
            return Err(remote_error(status, &body));
        }
        Ok(())
    }

    async fn delete_activity(&self, user_id: &str, entity_id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(user_id, "user id")?;
        Self::ensure_non_empty(entity_id, "entity id")?;

        let response = self
            .client
            .delete(self.endpoint.clone())
            .query(&self.identity_query(user_id, entity_id))
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("deleting activity: {error}")))?;

        let (status, body) = Self::read_body(response).await?;
        if !status.is_success() {
            return Err(remote_error(status, &body));
        }
        Ok(())
    }
}
