//! Client for the internal backend's task/user REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::InternalSection;
use crate::errors::ClientError;
use crate::models::{InternalTask, InternalUser, NewInternalTask, TaskPatch};

const SERVICE: &str = "internal backend";

/// Operations the bridge needs from the internal backend.
#[async_trait]
pub trait InternalApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<InternalUser>, ClientError>;
    async fn list_tasks(&self) -> Result<Vec<InternalTask>, ClientError>;
    async fn get_task(&self, id: i64) -> Result<Option<InternalTask>, ClientError>;
    async fn find_task_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<InternalTask>, ClientError>;
    async fn create_task(&self, task: &NewInternalTask) -> Result<InternalTask, ClientError>;
    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ClientError>;
    async fn delete_task(&self, id: i64) -> Result<(), ClientError>;
}

pub struct HttpInternalApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpInternalApi {
    pub fn new(section: &InternalSection) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()?;
        let mut base_url = section.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            token: section.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ClientError::Transport { service: SERVICE, source })?;
        check_status(resp).await?.json().await.map_err(|source| {
            ClientError::Decode { service: SERVICE, source }
        })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service: SERVICE,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl InternalApi for HttpInternalApi {
    async fn list_users(&self) -> Result<Vec<InternalUser>, ClientError> {
        self.get_json("users").await
    }

    async fn list_tasks(&self) -> Result<Vec<InternalTask>, ClientError> {
        self.get_json("tasks").await
    }

    async fn get_task(&self, id: i64) -> Result<Option<InternalTask>, ClientError> {
        match self.get_json(&format!("tasks/{}", id)).await {
            Ok(task) => Ok(Some(task)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_task_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<InternalTask>, ClientError> {
        // The filter query is the fast path; older backend versions ignore
        // unknown query parameters, so fall back to a full scan.
        let filtered: Result<Vec<InternalTask>, _> = self
            .get_json(&format!("tasks?external_id={}", external_id))
            .await;
        if let Ok(tasks) = filtered {
            if let Some(task) = tasks
                .into_iter()
                .find(|t| t.external_id.as_deref() == Some(external_id))
            {
                return Ok(Some(task));
            }
        }

        let all = self.list_tasks().await?;
        Ok(all
            .into_iter()
            .find(|t| t.external_id.as_deref() == Some(external_id)))
    }

    async fn create_task(&self, task: &NewInternalTask) -> Result<InternalTask, ClientError> {
        let resp = self
            .client
            .post(self.url("tasks"))
            .bearer_auth(&self.token)
            .json(task)
            .send()
            .await
            .map_err(|source| ClientError::Transport { service: SERVICE, source })?;
        check_status(resp).await?.json().await.map_err(|source| {
            ClientError::Decode { service: SERVICE, source }
        })
    }

    async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ClientError> {
        let resp = self
            .client
            .put(self.url(&format!("tasks/{}", id)))
            .bearer_auth(&self.token)
            .json(patch)
            .send()
            .await
            .map_err(|source| ClientError::Transport { service: SERVICE, source })?;
        check_status(resp).await?;
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> Result<(), ClientError> {
        let resp = self
            .client
            .delete(self.url(&format!("tasks/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ClientError::Transport { service: SERVICE, source })?;
        match check_status(resp).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for HttpInternalApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInternalApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
