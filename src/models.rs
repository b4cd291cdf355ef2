//! Shared domain types for both sides of the bridge.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used for internal tasks that have no external twin yet.
pub const PLACEHOLDER_PREFIX: &str = "PENDING_";

/// Generate a fresh placeholder external id.
pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4())
}

/// Whether an external id is a placeholder sentinel rather than a real link.
pub fn is_placeholder(external_id: &str) -> bool {
    external_id.starts_with(PLACEHOLDER_PREFIX)
}

// ── Internal backend ──────────────────────────────────────────────────

/// Task status as stored by the internal backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
        }
    }

    /// Default progress percentage implied by a status.
    pub fn default_progress(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 50,
            Self::Completed => 100,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// A user record owned by the internal backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Explicit backlink to the external identity, when one is stored.
    #[serde(default)]
    pub external_id: Option<String>,
}

/// A task row owned by the internal backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTask {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub progress_percentage: u8,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub assigner_id: Option<i64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InternalTask {
    /// External id when it is a real link, not a placeholder.
    pub fn linked_external_id(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .filter(|id| !is_placeholder(id))
    }

    pub fn has_placeholder(&self) -> bool {
        self.external_id.as_deref().is_some_and(is_placeholder)
    }
}

/// Payload for creating a task in the internal backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewInternalTask {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub progress_percentage: u8,
    pub assignee_id: Option<i64>,
    pub assigner_id: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Partial update against an internal task. `None` fields are omitted from
/// the request body entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

// ── External service ──────────────────────────────────────────────────

/// A member of the external team roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalUser {
    #[serde(deserialize_with = "de_id_string")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The nested status object the external API puts on tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalStatus {
    #[serde(default)]
    pub status: Option<String>,
}

/// A task as returned by the external API (subset of fields we care about).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ExternalStatus,
    /// Unix timestamp in milliseconds, as a string.
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub assignees: Vec<ExternalUser>,
    #[serde(default)]
    pub tags: Vec<ExternalTag>,
}

/// A tag attached to an external task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTag {
    pub name: String,
}

impl ExternalTask {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }

    pub fn status_str(&self) -> &str {
        self.status.status.as_deref().unwrap_or_default()
    }

    /// Primary assignee, when the external task has any.
    pub fn primary_assignee(&self) -> Option<&ExternalUser> {
        self.assignees.first()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        parse_due_date_ms(self.due_date.as_deref())
    }
}

/// Payload for creating a task in the external service.
#[derive(Debug, Clone, Serialize)]
pub struct NewExternalTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
}

/// Partial update against an external task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExternalTaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
}

/// Parse the external API's millisecond-epoch due date string.
pub fn parse_due_date_ms(due_date: Option<&str>) -> Option<DateTime<Utc>> {
    let ms: i64 = due_date?.parse().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

// ── Webhook events ────────────────────────────────────────────────────

/// Change notification delivered by the external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub history_items: Vec<HistoryItem>,
}

/// One entry of the history diff some webhook events embed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(default)]
    pub after: Option<HistoryAfter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryAfter {
    #[serde(default)]
    pub status: Option<String>,
}

impl WebhookPayload {
    /// New status from the last history item, when the diff carries one.
    pub fn status_from_history(&self) -> Option<&str> {
        self.history_items
            .last()?
            .after
            .as_ref()?
            .status
            .as_deref()
    }
}

/// The webhook event kinds this bridge reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    AssigneeChanged,
}

impl FromStr for WebhookEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "taskCreated" => Ok(Self::Created),
            "taskUpdated" => Ok(Self::Updated),
            "taskDeleted" => Ok(Self::Deleted),
            "taskStatusUpdated" => Ok(Self::StatusChanged),
            "taskAssigneeUpdated" => Ok(Self::AssigneeChanged),
            _ => Err(format!("Unhandled event type: {}", s)),
        }
    }
}

/// External user ids arrive as numbers or strings depending on the payload.
fn de_id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(i64),
        Str(String),
    }
    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Num(n) => n.to_string(),
        IdRepr::Str(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_roundtrip() {
        let id = placeholder_id();
        assert!(is_placeholder(&id));
        assert!(!is_placeholder("abc123"));
    }

    #[test]
    fn linked_external_id_filters_placeholders() {
        let mut task = sample_task();
        task.external_id = Some("abc".into());
        assert_eq!(task.linked_external_id(), Some("abc"));
        assert!(!task.has_placeholder());

        task.external_id = Some(placeholder_id());
        assert_eq!(task.linked_external_id(), None);
        assert!(task.has_placeholder());

        task.external_id = None;
        assert_eq!(task.linked_external_id(), None);
        assert!(!task.has_placeholder());
    }

    #[test]
    fn task_status_serializes_with_display_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            r#""In Progress""#
        );
        let parsed: TaskStatus = serde_json::from_str(r#""Completed""#).unwrap();
        assert_eq!(parsed, TaskStatus::Completed);
    }

    #[test]
    fn task_status_from_str_is_case_insensitive() {
        assert_eq!("in progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("PENDING".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert!("review".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_patch_omits_unset_fields() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            progress_percentage: Some(100),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["status"], "Completed");
        assert_eq!(json["progress_percentage"], 100);
        assert!(json.get("title").is_none());
        assert!(json.get("assignee_id").is_none());
    }

    #[test]
    fn external_user_id_accepts_number_or_string() {
        let from_num: ExternalUser = serde_json::from_str(r#"{"id": 555}"#).unwrap();
        assert_eq!(from_num.id, "555");
        let from_str: ExternalUser = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(from_str.id, "abc");
    }

    #[test]
    fn external_task_deserializes_nested_status() {
        let json = r#"{
            "id": "x1",
            "name": "Ship it",
            "status": {"status": "in progress"},
            "due_date": "1700000000000",
            "assignees": [{"id": 9, "email": "a@x.com"}]
        }"#;
        let task: ExternalTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.status_str(), "in progress");
        assert_eq!(task.primary_assignee().unwrap().id, "9");
        assert!(task.deadline().is_some());
    }

    #[test]
    fn parse_due_date_handles_garbage() {
        assert!(parse_due_date_ms(None).is_none());
        assert!(parse_due_date_ms(Some("not-a-number")).is_none());
        let parsed = parse_due_date_ms(Some("1700000000000")).unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn webhook_event_kinds_parse() {
        assert_eq!(
            "taskStatusUpdated".parse::<WebhookEventKind>().unwrap(),
            WebhookEventKind::StatusChanged
        );
        assert!("listCreated".parse::<WebhookEventKind>().is_err());
    }

    #[test]
    fn status_from_history_takes_last_item() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "event": "taskStatusUpdated",
                "task_id": "abc",
                "history_items": [
                    {"after": {"status": "in progress"}},
                    {"after": {"status": "complete"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(payload.status_from_history(), Some("complete"));
    }

    #[test]
    fn status_from_history_empty_is_none() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"event": "taskStatusUpdated", "task_id": "abc"}"#).unwrap();
        assert!(payload.status_from_history().is_none());
    }

    fn sample_task() -> InternalTask {
        InternalTask {
            id: 1,
            external_id: None,
            title: "t".into(),
            description: None,
            status: TaskStatus::Pending,
            progress_percentage: 0,
            assignee_id: None,
            assigner_id: None,
            deadline: None,
            created_at: Utc::now(),
        }
    }
}
