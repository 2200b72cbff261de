use crate::consts::UNKNOWN_STUDENT;
use crate::registry::CallRegistry;
use crate::relay::{Channel, EventRelay, RelayEvent};
use crate::store::Store;
use crate::types::CallReport;
use crate::vapi_types::{WebhookCall, WebhookEnvelope, WebhookMessage};

use tracing::{debug, error, info, warn};

/// What a webhook delivery amounted to.
#[derive(Debug, PartialEq)]
pub enum Dispatched {
    CallEnded { call_id: String },
    Report(CallReport),
    Ignored,
}

/// Parse a raw webhook body. Unparseable bodies are logged and ignored.
pub fn parse_envelope(body: &str) -> Option<WebhookEnvelope> {
    match serde_json::from_str(body) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "failed to deserialize webhook body");
            None
        }
    }
}

/// Apply one provider event to the registry and relay it to teacher dashboards.
///
/// The registry entry is only removed on `end-of-call-report`, after the report has been
/// relayed and the durable write attempted. Both terminal paths tolerate redelivery.
pub async fn dispatch(
    registry: &CallRegistry,
    relay: &EventRelay,
    store: Option<&Store>,
    message: WebhookMessage,
    now: f64,
) -> Dispatched {
    match message {
        WebhookMessage::StatusUpdate {
            status,
            call,
            ended_reason,
        } => {
            let call_id = call_id_of(call.as_ref());
            debug!(?status, call_id, "status update");
            if !status.is_terminal() {
                return Dispatched::Ignored;
            }
            let Some(call_id) = call_id else {
                return Dispatched::Ignored;
            };
            match registry.mark_ended(call_id, now) {
                Some(ended) => {
                    info!(
                        call_id,
                        student = %ended.student,
                        duration = ?ended.duration,
                        ended_reason = ?ended_reason,
                        "call ended"
                    );
                    relay.publish(Channel::Teacher, RelayEvent::CallEnded(ended));
                    Dispatched::CallEnded {
                        call_id: call_id.to_string(),
                    }
                }
                None if registry.contains(call_id) => {
                    debug!(call_id, "repeated terminal status");
                    Dispatched::Ignored
                }
                None => {
                    debug!(call_id, "terminal status for unknown call");
                    Dispatched::Ignored
                }
            }
        }
        WebhookMessage::EndOfCallReport {
            call,
            recording_url,
            summary,
            transcript,
            messages,
            ended_reason,
            duration_seconds,
            artifact,
        } => {
            let call_id = call_id_of(call.as_ref()).map(str::to_string);
            let tracked = call_id.as_deref().and_then(|id| registry.get(id));
            let artifact = artifact.unwrap_or_default();

            let student = match &tracked {
                Some(active) => active.student.clone(),
                None => call
                    .as_ref()
                    .and_then(|c| c.customer.as_ref())
                    .and_then(|c| c.name.clone())
                    .unwrap_or_else(|| UNKNOWN_STUDENT.to_string()),
            };
            let report = CallReport {
                call_id: call_id.clone(),
                student,
                recording_url: recording_url.or(artifact.recording_url),
                summary,
                transcript: transcript.or(artifact.transcript),
                messages: messages.or(artifact.messages).unwrap_or_default(),
                ended_reason,
                duration: tracked
                    .as_ref()
                    .and_then(|c| c.duration)
                    .or(duration_seconds),
                timestamp: now,
            };
            if tracked.is_some() {
                info!(call_id = ?report.call_id, student = %report.student, "call report");
            } else {
                info!(
                    call_id = ?report.call_id,
                    student = %report.student,
                    "call report recovered from payload"
                );
            }
            relay.publish(Channel::Teacher, RelayEvent::CallReport(report.clone()));

            if let (Some(store), Some(call_id)) = (store, call_id.as_deref()) {
                if let Err(e) = store.finish_call(call_id, &report, tracked.as_ref()).await {
                    error!(call_id, error = %e, "failed to persist call report");
                }
            }
            if let Some(call_id) = call_id.as_deref() {
                registry.remove(call_id);
            }
            Dispatched::Report(report)
        }
        WebhookMessage::Unknown => {
            debug!("ignoring unrecognized webhook message");
            Dispatched::Ignored
        }
    }
}

fn call_id_of(call: Option<&WebhookCall>) -> Option<&str> {
    call.and_then(|c| c.id.as_deref()).filter(|id| !id.is_empty())
}
