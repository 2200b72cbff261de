use crate::error::{check_upstream, AppError};
use crate::poller::CallStatusSource;
use crate::vapi_types::{
    CallStatus, ControlMessage, CreateCallRequest, CreatedResource, Customer, VapiFile,
};

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TIMEOUT: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the voice-AI provider's REST API. Each method is a single request; nothing here
/// retries.
#[derive(Clone)]
pub struct VapiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    phone_number_id: String,
}

impl VapiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            phone_number_id: phone_number_id.into(),
        }
    }

    pub async fn create_assistant(&self, config: &Value) -> Result<String, AppError> {
        let resp = self
            .http
            .post(format!("{}/assistant", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(CREATE_TIMEOUT)
            .json(config)
            .send()
            .await?;
        let created: CreatedResource = check_upstream("vapi", resp).await?.json().await?;
        info!(assistant_id = %created.id, "created assistant");
        Ok(created.id)
    }

    pub async fn start_call(
        &self,
        assistant_id: &str,
        student_name: &str,
        student_number: &str,
    ) -> Result<String, AppError> {
        let body = CreateCallRequest {
            phone_number_id: &self.phone_number_id,
            assistant_id,
            customer: Customer {
                name: Some(student_name.to_string()),
                number: Some(student_number.to_string()),
            },
        };
        let resp = self
            .http
            .post(format!("{}/call", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(CREATE_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let created: CreatedResource = check_upstream("vapi", resp).await?.json().await?;
        info!(call_id = %created.id, assistant_id, "started call");
        Ok(created.id)
    }

    pub async fn get_call_status(&self, call_id: &str) -> Result<CallStatus, AppError> {
        let resp = self
            .http
            .get(format!("{}/call/{}", self.base_url, call_id))
            .bearer_auth(&self.api_key)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;
        let status: CallStatus = check_upstream("vapi", resp).await?.json().await?;
        debug!(call_id, status = ?status.status, "fetched call status");
        Ok(status)
    }

    pub async fn delete_assistant(&self, assistant_id: &str) -> Result<(), AppError> {
        let resp = self
            .http
            .delete(format!("{}/assistant/{}", self.base_url, assistant_id))
            .bearer_auth(&self.api_key)
            .timeout(CREATE_TIMEOUT)
            .send()
            .await?;
        check_upstream("vapi", resp).await?;
        info!(assistant_id, "deleted assistant");
        Ok(())
    }

    /// Upload a knowledge-base file.
    pub async fn upload_file(
        &self,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<VapiFile, AppError> {
        let mut part = Part::bytes(bytes).file_name(file_name);
        if let Some(content_type) = content_type {
            part = part.mime_str(&content_type)?;
        }
        let resp = self
            .http
            .post(format!("{}/file", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        let file: VapiFile = check_upstream("vapi", resp).await?.json().await?;
        info!(file_id = %file.id, "uploaded file");
        Ok(file)
    }

    /// Send a directive to a live call through its control url.
    pub async fn send_control_message(
        &self,
        control_url: &str,
        message: &ControlMessage,
    ) -> Result<(), AppError> {
        let resp = self
            .http
            .post(control_url)
            .timeout(CONTROL_TIMEOUT)
            .json(message)
            .send()
            .await?;
        check_upstream("vapi control", resp).await?;
        Ok(())
    }
}

impl CallStatusSource for VapiClient {
    async fn call_status(&self, call_id: &str) -> Result<CallStatus, AppError> {
        self.get_call_status(call_id).await
    }
}
