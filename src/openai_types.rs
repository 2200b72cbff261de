use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response of the Whisper `audio/transcriptions` endpoint in `json` format.
#[derive(Deserialize, Debug)]
pub struct TranscriptionResponse {
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct OllamaGenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: String,
    pub stream: bool,
}

#[derive(Deserialize, Debug)]
pub struct OllamaGenerateResponse {
    pub response: String,
}

/// Tool-call request the voice provider sends when an assistant invokes the grading tool.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    #[serde(default)]
    pub message: ToolCallMessage,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub tool_call_list: Vec<ToolCall>,
}

#[derive(Deserialize, Debug)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: ToolFunction,
}

#[derive(Deserialize, Debug, Default)]
pub struct ToolFunction {
    #[serde(default)]
    pub arguments: Value,
}

/// Arguments of the grading tool. Every field arrives as a string.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GradeArguments {
    pub response: String,
    pub grade: String,
    pub language: String,
    pub question: String,
    pub num_response: String,
}
