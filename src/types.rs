use crate::auth::SupabaseAuth;
use crate::grading::InferenceClient;
use crate::poller::PollPolicy;
use crate::registry::CallRegistry;
use crate::relay::EventRelay;
use crate::store::Store;
use crate::vapi::VapiClient;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call the bridge is currently tracking. Serialized as-is to dashboard clients.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCall {
    pub call_id: String,
    pub assistant_id: String,
    pub student: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_number: Option<String>,
    pub listen_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    /// Unix seconds.
    pub start_time: f64,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    /// Seconds between start and the first terminal status update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_grade: Option<String>,
    #[serde(skip)]
    pub transcription: TranscriptionContext,
}

impl ActiveCall {
    pub fn new(
        call_id: String,
        assistant_id: String,
        student: String,
        listen_url: String,
        start_time: f64,
    ) -> Self {
        Self {
            call_id,
            assistant_id,
            student,
            student_number: None,
            listen_url,
            control_url: None,
            start_time,
            ended: false,
            end_time: None,
            duration: None,
            current_grade: None,
            transcription: TranscriptionContext::default(),
        }
    }
}

/// Running transcript segments and letter grade for a live call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranscriptionContext {
    pub segments: Vec<String>,
    pub grade: Option<String>,
}

impl TranscriptionContext {
    pub fn transcript(&self) -> String {
        self.segments.join(" ")
    }
}

/// Normalized end-of-call report relayed to dashboards.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    pub call_id: Option<String>,
    pub student: String,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub messages: Vec<Value>,
    pub ended_reason: Option<String>,
    pub duration: Option<f64>,
    pub timestamp: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessage {
    pub call_id: String,
    pub message: String,
    pub timestamp: f64,
}

pub struct AppState {
    pub vapi: VapiClient,
    pub poll_policy: PollPolicy,
    pub registry: CallRegistry,
    pub relay: EventRelay,
    /// Durable mirror of assistants and calls; absent when no database is configured.
    pub store: Option<Store>,
    pub auth: Option<SupabaseAuth>,
    pub inference: InferenceClient,
}

impl AppState {
    pub fn store(&self) -> Result<&Store, crate::error::AppError> {
        self.store
            .as_ref()
            .ok_or(crate::error::AppError::Unavailable("database"))
    }
}
