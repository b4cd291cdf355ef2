//! Client for the external project-management API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ExternalSection;
use crate::errors::ClientError;
use crate::models::{ExternalTask, ExternalTaskPatch, ExternalUser, NewExternalTask};

const SERVICE: &str = "external service";
const USER_AGENT: &str = "taskbridge";

/// Operations the bridge needs from the external service.
#[async_trait]
pub trait ExternalApi: Send + Sync {
    /// Full team roster. The API paginates nothing here; very large teams
    /// are a known scale limit.
    async fn team_roster(&self) -> Result<Vec<ExternalUser>, ClientError>;
    async fn get_task(&self, id: &str) -> Result<Option<ExternalTask>, ClientError>;
    async fn create_task(&self, task: &NewExternalTask) -> Result<ExternalTask, ClientError>;
    async fn update_task(&self, id: &str, patch: &ExternalTaskPatch) -> Result<(), ClientError>;
    async fn delete_task(&self, id: &str) -> Result<(), ClientError>;
    async fn task_tags(&self, id: &str) -> Result<Vec<String>, ClientError>;
    async fn add_tag(&self, id: &str, tag: &str) -> Result<(), ClientError>;
    async fn remove_tag(&self, id: &str, tag: &str) -> Result<(), ClientError>;
}

// Roster responses nest each user inside a member wrapper.
#[derive(Deserialize)]
struct TeamResponse {
    team: TeamBody,
}

#[derive(Deserialize)]
struct TeamBody {
    #[serde(default)]
    members: Vec<TeamMember>,
}

#[derive(Deserialize)]
struct TeamMember {
    user: ExternalUser,
}

pub struct HttpExternalApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    team_id: String,
    list_id: String,
}

impl HttpExternalApi {
    pub fn new(section: &ExternalSection) -> Result<Self, anyhow::Error> {
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
            team_id: section.team_id.clone(),
            list_id: section.list_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(reqwest::header::AUTHORIZATION, self.token.as_str())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let resp = builder
            .send()
            .await
            .map_err(|source| ClientError::Transport { service: SERVICE, source })?;
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
}

#[async_trait]
impl ExternalApi for HttpExternalApi {
    async fn team_roster(&self) -> Result<Vec<ExternalUser>, ClientError> {
        let resp = self
            .send(self.request(reqwest::Method::GET, &format!("team/{}", self.team_id)))
            .await?;
        let team: TeamResponse = resp
            .json()
            .await
            .map_err(|source| ClientError::Decode { service: SERVICE, source })?;
        Ok(team.team.members.into_iter().map(|m| m.user).collect())
    }

    async fn get_task(&self, id: &str) -> Result<Option<ExternalTask>, ClientError> {
        let resp = match self
            .send(self.request(reqwest::Method::GET, &format!("task/{}", id)))
            .await
        {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let task = resp
            .json()
            .await
            .map_err(|source| ClientError::Decode { service: SERVICE, source })?;
        Ok(Some(task))
    }

    async fn create_task(&self, task: &NewExternalTask) -> Result<ExternalTask, ClientError> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("list/{}/task", self.list_id),
                )
                .json(task),
            )
            .await?;
        resp.json()
            .await
            .map_err(|source| ClientError::Decode { service: SERVICE, source })
    }

    async fn update_task(&self, id: &str, patch: &ExternalTaskPatch) -> Result<(), ClientError> {
        self.send(
            self.request(reqwest::Method::PUT, &format!("task/{}", id))
                .json(patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), ClientError> {
        match self
            .send(self.request(reqwest::Method::DELETE, &format!("task/{}", id)))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn task_tags(&self, id: &str) -> Result<Vec<String>, ClientError> {
        // The API exposes no standalone tag listing; tags ride on the task.
        Ok(self
            .get_task(id)
            .await?
            .map(|task| task.tag_names())
            .unwrap_or_default())
    }

    async fn add_tag(&self, id: &str, tag: &str) -> Result<(), ClientError> {
        self.send(self.request(
            reqwest::Method::POST,
            &format!("task/{}/tag/{}", id, tag),
        ))
        .await?;
        Ok(())
    }

    async fn remove_tag(&self, id: &str, tag: &str) -> Result<(), ClientError> {
        self.send(self.request(
            reqwest::Method::DELETE,
            &format!("task/{}/tag/{}", id, tag),
        ))
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpExternalApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExternalApi")
            .field("base_url", &self.base_url)
            .field("team_id", &self.team_id)
            .field("list_id", &self.list_id)
            .finish_non_exhaustive()
    }
}
