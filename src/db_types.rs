use crate::utils::{assistant_display_name, to_unix_seconds};

use serde::{Serialize, Serializer};
use serde_json::Value;
use sqlx::types::time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Assistant {
    pub id: i64,
    pub vapi_id: String,
    pub cfg: sqlx::types::Json<Value>,
    pub teacher_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Compact assistant listing for dashboard pickers. `id` is the provider id.
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: f64,
}

impl From<Assistant> for AssistantSummary {
    fn from(row: Assistant) -> Self {
        Self {
            name: assistant_display_name(&row.cfg.0),
            id: row.vapi_id,
            description: row.description,
            created_at: to_unix_seconds(row.created_at),
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Call {
    pub id: String,
    pub assistant_id: String,
    pub student_name: String,
    pub student_number: Option<String>,
    pub listen_url: Option<String>,
    pub control_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub duration_sec: Option<f64>,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub ended_reason: Option<String>,
    pub viewed: bool,
    /// Joined from `assistants`; serialized as `"assistant": {"assistant_name": ..}`.
    #[serde(rename = "assistant", serialize_with = "nest_assistant_name")]
    pub assistant_name: Option<String>,
}

fn nest_assistant_name<S: Serializer>(name: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct AssistantRef<'a> {
        assistant_name: &'a str,
    }
    name.as_deref()
        .map(|assistant_name| AssistantRef { assistant_name })
        .serialize(s)
}

pub struct NewCall<'a> {
    pub id: &'a str,
    pub assistant_id: &'a str,
    pub student_name: &'a str,
    pub student_number: Option<&'a str>,
    pub listen_url: &'a str,
    pub control_url: Option<&'a str>,
    pub started_at: OffsetDateTime,
}
