mod rest {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
    pub struct Customer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub number: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateCallRequest<'a> {
        pub phone_number_id: &'a str,
        pub assistant_id: &'a str,
        pub customer: Customer,
    }

    /// Minimal view of the resource returned by create endpoints.
    #[derive(Deserialize, Debug)]
    pub struct CreatedResource {
        pub id: String,
    }

    #[derive(Deserialize, Clone, Debug, Default, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct Monitor {
        #[serde(default)]
        pub listen_url: Option<String>,
        #[serde(default)]
        pub control_url: Option<String>,
    }

    /// The fields of `GET /call/{id}` the bridge cares about.
    #[derive(Deserialize, Clone, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct CallStatus {
        pub id: String,
        #[serde(default)]
        pub status: Option<String>,
        #[serde(default)]
        pub monitor: Option<Monitor>,
    }

    impl CallStatus {
        pub fn listen_url(&self) -> Option<&str> {
            self.monitor
                .as_ref()
                .and_then(|m| m.listen_url.as_deref())
                .filter(|url| !url.is_empty())
        }

        pub fn control_url(&self) -> Option<&str> {
            self.monitor
                .as_ref()
                .and_then(|m| m.control_url.as_deref())
                .filter(|url| !url.is_empty())
        }
    }

    #[derive(Deserialize, Clone, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct VapiFile {
        pub id: String,
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub url: Option<String>,
    }

    /// Live-call directive sent to a call's control url.
    #[derive(Serialize, Debug, PartialEq)]
    #[serde(rename_all = "camelCase", tag = "type")]
    pub enum ControlMessage {
        Say {
            content: String,
            end_call_after_spoken: bool,
        },
    }
}
pub use rest::*;

mod webhook {
    use super::rest::Customer;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Deserialize, Debug)]
    pub struct WebhookEnvelope {
        pub message: WebhookMessage,
    }

    #[derive(Deserialize, Clone, Debug, Default)]
    pub struct WebhookCall {
        #[serde(default)]
        pub id: Option<String>,
        #[serde(default)]
        pub customer: Option<Customer>,
    }

    #[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallStatusKind {
        Scheduled,
        Queued,
        Ringing,
        InProgress,
        Forwarding,
        Ended,
        Failed,
        #[serde(other)]
        Other,
    }

    impl CallStatusKind {
        pub fn is_terminal(self) -> bool {
            matches!(self, CallStatusKind::Ended | CallStatusKind::Failed)
        }
    }

    /// Newer payloads nest the report fields under `artifact`.
    #[derive(Deserialize, Clone, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Artifact {
        #[serde(default)]
        pub recording_url: Option<String>,
        #[serde(default)]
        pub transcript: Option<String>,
        #[serde(default)]
        pub messages: Option<Vec<Value>>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub enum WebhookMessage {
        #[serde(rename = "status-update", rename_all = "camelCase")]
        StatusUpdate {
            status: CallStatusKind,
            #[serde(default)]
            call: Option<WebhookCall>,
            #[serde(default)]
            ended_reason: Option<String>,
        },
        #[serde(rename = "end-of-call-report", rename_all = "camelCase")]
        EndOfCallReport {
            #[serde(default)]
            call: Option<WebhookCall>,
            #[serde(default)]
            recording_url: Option<String>,
            #[serde(default)]
            summary: Option<String>,
            #[serde(default)]
            transcript: Option<String>,
            #[serde(default)]
            messages: Option<Vec<Value>>,
            #[serde(default)]
            ended_reason: Option<String>,
            #[serde(default)]
            duration_seconds: Option<f64>,
            #[serde(default)]
            artifact: Option<Artifact>,
        },
        #[serde(other)]
        Unknown,
    }
}
pub use webhook::*;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_status_ignores_empty_listen_url() {
        let status: CallStatus = serde_json::from_value(json!({
            "id": "call_1",
            "status": "queued",
            "monitor": { "listenUrl": "" }
        }))
        .unwrap();
        assert_eq!(status.listen_url(), None);

        let status: CallStatus = serde_json::from_value(json!({
            "id": "call_1",
            "monitor": { "listenUrl": "wss://listen/1", "controlUrl": "https://control/1" }
        }))
        .unwrap();
        assert_eq!(status.listen_url(), Some("wss://listen/1"));
        assert_eq!(status.control_url(), Some("https://control/1"));
    }

    #[test]
    fn create_call_request_shape() {
        let body = serde_json::to_value(CreateCallRequest {
            phone_number_id: "phone_1",
            assistant_id: "asst_1",
            customer: Customer {
                name: Some("Ana".into()),
                number: Some("+15551234567".into()),
            },
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "phoneNumberId": "phone_1",
                "assistantId": "asst_1",
                "customer": { "name": "Ana", "number": "+15551234567" }
            })
        );
    }

    #[test]
    fn control_message_shape() {
        let body = serde_json::to_value(ControlMessage::Say {
            content: "Please speak up".into(),
            end_call_after_spoken: false,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({ "type": "say", "content": "Please speak up", "endCallAfterSpoken": false })
        );
    }

    #[test]
    fn webhook_variants_parse() {
        let env: WebhookEnvelope = serde_json::from_value(json!({
            "message": {
                "type": "status-update",
                "status": "failed",
                "call": { "id": "c" },
                "endedReason": "pipeline-error"
            }
        }))
        .unwrap();
        match env.message {
            WebhookMessage::StatusUpdate {
                status,
                call,
                ended_reason,
            } => {
                assert_eq!(status, CallStatusKind::Failed);
                assert!(status.is_terminal());
                assert_eq!(call.unwrap().id.as_deref(), Some("c"));
                assert_eq!(ended_reason.as_deref(), Some("pipeline-error"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let env: WebhookEnvelope = serde_json::from_value(json!({
            "message": {
                "type": "end-of-call-report",
                "call": { "id": "c", "customer": { "name": "Ana" } },
                "recordingUrl": "https://rec/c.wav",
                "endedReason": "customer-ended-call"
            }
        }))
        .unwrap();
        match env.message {
            WebhookMessage::EndOfCallReport {
                recording_url,
                ended_reason,
                ..
            } => {
                assert_eq!(recording_url.as_deref(), Some("https://rec/c.wav"));
                assert_eq!(ended_reason.as_deref(), Some("customer-ended-call"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrecognized_types_and_statuses_fall_through() {
        let env: WebhookEnvelope = serde_json::from_value(json!({
            "message": { "type": "speech-update", "status": "started" }
        }))
        .unwrap();
        assert!(matches!(env.message, WebhookMessage::Unknown));

        let env: WebhookEnvelope = serde_json::from_value(json!({
            "message": { "type": "status-update", "status": "paused" }
        }))
        .unwrap();
        assert!(matches!(
            env.message,
            WebhookMessage::StatusUpdate {
                status: CallStatusKind::Other,
                ..
            }
        ));
    }
}
