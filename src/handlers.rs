use crate::auth::{AuthenticatedTeacher, MaybeTeacher};
use crate::consts::KNOWLEDGE_BASE_PROVIDER;
use crate::db_types::{AssistantSummary, Call, NewCall};
use crate::error::AppError;
use crate::grading::grade_arguments;
use crate::openai_types::ToolCallRequest;
use crate::poller::poll_monitor_urls;
use crate::relay::{Channel, RelayEvent};
use crate::types::{ActiveCall, AppState};
use crate::utils::{from_unix_seconds, unix_now};
use crate::vapi::VapiClient;
use crate::vapi_types::ControlMessage;
use crate::webhook::{dispatch, parse_envelope};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Parse a JSON request body, turning any failure into a 400 with a readable message.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, AppError> {
    serde_json::from_str(body).map_err(|e| {
        debug!(error = %e, "rejecting malformed request body");
        AppError::Validation(format!("invalid request body: {e}"))
    })
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct StartCallRequest {
    assistant_id: Option<String>,
    assistant_config: Option<Value>,
    student_name: Option<String>,
    student_number: Option<String>,
}

pub async fn start_call(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    trace!(body = %body, "start-call request body");
    let req: StartCallRequest = parse_body(&body)?;
    let assistant_id = required(req.assistant_id);
    let (Some(student_name), Some(student_number)) =
        (required(req.student_name), required(req.student_number))
    else {
        return Err(AppError::Validation(
            "assistantId, studentName, studentNumber are required".into(),
        ));
    };
    let assistant_id = match (assistant_id, req.assistant_config) {
        (Some(id), _) => id,
        (None, Some(config)) => {
            validate_assistant_config(&config)?;
            let id = app_state.vapi.create_assistant(&config).await?;
            if let Some(store) = app_state.store.as_ref() {
                if let Err(e) = store.upsert_assistant(&id, &config, None, None).await {
                    error!(assistant_id = %id, error = %e, "failed to persist inline assistant");
                }
            }
            id
        }
        (None, None) => {
            return Err(AppError::Validation(
                "assistantId, studentName, studentNumber are required".into(),
            ))
        }
    };
    info!(student = %student_name, assistant_id = %assistant_id, "starting call");

    let call_id = app_state
        .vapi
        .start_call(&assistant_id, &student_name, &student_number)
        .await?;
    let urls = poll_monitor_urls(&app_state.vapi, &call_id, app_state.poll_policy).await?;

    let mut call = ActiveCall::new(
        call_id.clone(),
        assistant_id,
        student_name,
        urls.listen_url,
        unix_now(),
    );
    call.student_number = Some(student_number);
    call.control_url = urls.control_url;
    app_state.registry.insert(call.clone());

    if let Some(store) = app_state.store.as_ref() {
        let started_at = from_unix_seconds(call.start_time)
            .unwrap_or_else(time::OffsetDateTime::now_utc);
        let row = NewCall {
            id: &call.call_id,
            assistant_id: &call.assistant_id,
            student_name: &call.student,
            student_number: call.student_number.as_deref(),
            listen_url: &call.listen_url,
            control_url: call.control_url.as_deref(),
            started_at,
        };
        // the call is live either way; the registry stays authoritative
        if let Err(e) = store.insert_call(row).await {
            error!(call_id = %call.call_id, error = %e, "failed to persist call");
        }
    }

    app_state
        .relay
        .publish(Channel::Teacher, RelayEvent::NewCall(call));
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "callId": call_id })),
    ))
}

fn validate_assistant_config(config: &Value) -> Result<(), AppError> {
    match config.get("model") {
        Some(model) if !model.is_null() => Ok(()),
        _ => Err(AppError::Validation(
            "'model' is required in assistant config".into(),
        )),
    }
}

pub async fn create_assistant(
    State(app_state): State<Arc<AppState>>,
    MaybeTeacher(teacher): MaybeTeacher,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let mut payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        parse_body(&body)?
    };
    // dashboards wrap the config as {config, description}; older clients post it bare
    let (config, description) = match payload.get_mut("config").map(Value::take) {
        Some(config @ Value::Object(_)) => {
            let description = payload
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            (config, description)
        }
        _ => (payload, None),
    };
    validate_assistant_config(&config)?;

    let assistant_id = app_state.vapi.create_assistant(&config).await?;
    if let Some(store) = app_state.store.as_ref() {
        store
            .upsert_assistant(
                &assistant_id,
                &config,
                teacher.as_ref().map(|t| t.id),
                description.as_deref(),
            )
            .await?;
    }
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "assistantId": assistant_id })),
    ))
}

pub async fn active_calls(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(app_state.registry.snapshot())
}

/// Provider callbacks. Always 200 so the sender never retries a delivery we failed to process.
pub async fn vapi_webhook(State(app_state): State<Arc<AppState>>, body: String) -> StatusCode {
    trace!(body = %body, "webhook body");
    if let Some(envelope) = parse_envelope(&body) {
        let outcome = dispatch(
            &app_state.registry,
            &app_state.relay,
            app_state.store.as_ref(),
            envelope.message,
            unix_now(),
        )
        .await;
        debug!(?outcome, "webhook processed");
    }
    StatusCode::OK
}

pub async fn list_assistants(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<AssistantSummary>>, AppError> {
    let rows = app_state.store()?.list_assistants().await?;
    Ok(Json(rows.into_iter().map(AssistantSummary::from).collect()))
}

pub async fn teacher_assistants(
    State(app_state): State<Arc<AppState>>,
    AuthenticatedTeacher(teacher): AuthenticatedTeacher,
) -> Result<Json<Vec<AssistantSummary>>, AppError> {
    let rows = app_state
        .store()?
        .list_teacher_assistants(teacher.id)
        .await?;
    Ok(Json(rows.into_iter().map(AssistantSummary::from).collect()))
}

pub async fn assistants_by_key(
    State(app_state): State<Arc<AppState>>,
    Path(student_key): Path<String>,
) -> Result<Json<Vec<AssistantSummary>>, AppError> {
    let rows = app_state
        .store()?
        .list_assistants_by_key(&student_key)
        .await?;
    Ok(Json(rows.into_iter().map(AssistantSummary::from).collect()))
}

pub async fn delete_assistant(
    State(app_state): State<Arc<AppState>>,
    AuthenticatedTeacher(teacher): AuthenticatedTeacher,
    Path(assistant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = app_state.store()?;
    if !store.assistant_owned_by(&assistant_id, teacher.id).await? {
        return Err(AppError::NotFound(format!("assistant {assistant_id}")));
    }
    delete_upstream_assistant(&app_state.vapi, &assistant_id).await?;
    store.soft_delete_assistant(&assistant_id, teacher.id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Delete the provider's copy of an assistant. One that is already gone counts as deleted.
async fn delete_upstream_assistant(
    vapi: &VapiClient,
    assistant_id: &str,
) -> Result<(), AppError> {
    match vapi.delete_assistant(assistant_id).await {
        Err(AppError::Upstream { status: 404, .. }) => {
            warn!(assistant_id, "assistant already gone upstream");
            Ok(())
        }
        other => other,
    }
}

pub async fn teacher_calls(
    State(app_state): State<Arc<AppState>>,
    AuthenticatedTeacher(teacher): AuthenticatedTeacher,
) -> Result<Json<Vec<Call>>, AppError> {
    let calls = app_state.store()?.list_teacher_calls(teacher.id).await?;
    Ok(Json(calls))
}

#[derive(Deserialize)]
struct MarkViewedRequest {
    #[serde(default = "default_viewed")]
    viewed: bool,
}

fn default_viewed() -> bool {
    true
}

pub async fn mark_call_viewed(
    State(app_state): State<Arc<AppState>>,
    AuthenticatedTeacher(teacher): AuthenticatedTeacher,
    Path(call_id): Path<String>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let req: MarkViewedRequest = if body.trim().is_empty() {
        MarkViewedRequest { viewed: true }
    } else {
        parse_body(&body)?
    };
    let updated = app_state
        .store()?
        .mark_call_viewed(&call_id, teacher.id, req.viewed)
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!("call {call_id}")));
    }
    Ok(Json(json!({ "success": true, "viewed": req.viewed })))
}

pub async fn upload_file(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file = None;
    let mut name = None;
    let mut description = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("invalid file field: {e}")))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            "name" | "description" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("invalid text field: {e}")))?;
                if field_name == "name" {
                    name = required(Some(text));
                } else {
                    description = Some(text.trim().to_string());
                }
            }
            other => debug!(field = other, "ignoring multipart field"),
        }
    }
    let (Some((file_name, content_type, bytes)), Some(name)) = (file, name) else {
        return Err(AppError::Validation(
            "Please provide a file and name".into(),
        ));
    };
    if bytes.is_empty() {
        return Err(AppError::Validation("uploaded file is empty".into()));
    }

    let uploaded = app_state
        .vapi
        .upload_file(file_name, content_type, bytes)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "provider": KNOWLEDGE_BASE_PROVIDER,
            "name": name,
            "description": description.unwrap_or_default(),
            "fileIds": [uploaded.id],
        })),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlRequest {
    call_id: Option<String>,
    control_url: Option<String>,
    message: Option<String>,
    #[serde(default)]
    end_call_after_spoken: bool,
}

pub async fn send_control_message(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let req: ControlRequest = parse_body(&body)?;
    let Some(message) = required(req.message) else {
        return Err(AppError::Validation("message is required".into()));
    };
    // only ever post to a control url the provider issued for a live call
    let control_url = match (required(req.call_id), required(req.control_url)) {
        (Some(call_id), _) => app_state
            .registry
            .get(&call_id)
            .and_then(|c| c.control_url)
            .ok_or_else(|| AppError::NotFound(format!("control url for call {call_id}")))?,
        (None, Some(url)) if app_state.registry.has_control_url(&url) => url,
        (None, Some(_)) => {
            warn!("rejecting control message for an unknown control url");
            return Err(AppError::Validation(
                "controlUrl does not belong to an active call".into(),
            ));
        }
        (None, None) => {
            return Err(AppError::Validation(
                "callId or controlUrl is required".into(),
            ))
        }
    };
    app_state
        .vapi
        .send_control_message(
            &control_url,
            &ControlMessage::Say {
                content: message,
                end_call_after_spoken: req.end_call_after_spoken,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Grading tool invoked by the assistant mid-call.
pub async fn get_grade(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let req: ToolCallRequest = parse_body(&body)?;
    let tool_call = req
        .message
        .tool_call_list
        .first()
        .ok_or_else(|| AppError::Validation("Invalid tool call format".into()))?;
    let args = grade_arguments(&tool_call.function.arguments)?;
    let grade = app_state.inference.grade_response(&args).await?;
    Ok(Json(json!({
        "tool_call_id": tool_call.id,
        "grade_result": grade,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest {
    call_id: Option<String>,
    #[serde(default)]
    audio_data: Vec<u8>,
    sample_rate: Option<u32>,
}

pub async fn transcribe_audio(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let req: TranscribeRequest = parse_body(&body)?;
    if req.audio_data.is_empty() {
        return Err(AppError::Validation("audioData is required".into()));
    }
    debug!(
        call_id = ?req.call_id,
        bytes = req.audio_data.len(),
        sample_rate = ?req.sample_rate,
        "transcribing audio"
    );
    let transcript = app_state.inference.transcribe(req.audio_data).await?;
    if let Some(call_id) = req.call_id.as_deref() {
        if app_state
            .registry
            .record_transcription(call_id, Some(&transcript), None)
            .is_none()
        {
            debug!(call_id, "transcript for a call that is not active");
        }
    }
    Ok(Json(json!({ "transcript": transcript })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeTranscriptRequest {
    call_id: Option<String>,
    transcript: Option<String>,
    current_grade: Option<String>,
    student: Option<String>,
}

pub async fn grade_transcript(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    let req: GradeTranscriptRequest = parse_body(&body)?;
    let Some(transcript) = required(req.transcript) else {
        return Err(AppError::Validation("transcript is required".into()));
    };
    let tracked = req
        .call_id
        .as_deref()
        .and_then(|id| app_state.registry.get(id));
    let current_grade = required(req.current_grade)
        .or_else(|| tracked.as_ref().and_then(|c| c.transcription.grade.clone()));
    let student = required(req.student).or_else(|| tracked.as_ref().map(|c| c.student.clone()));

    let grade = app_state
        .inference
        .grade_transcript(&transcript, current_grade.as_deref(), student.as_deref())
        .await?;
    if let Some(call_id) = req.call_id.as_deref() {
        app_state
            .registry
            .record_transcription(call_id, None, Some(&grade));
    }
    Ok(Json(json!({ "grade": grade })))
}
