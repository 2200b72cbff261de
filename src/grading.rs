use crate::consts::{LETTER_GRADES, WHISPER_MODEL};
use crate::error::{check_upstream, AppError};
use crate::openai_types::{
    GradeArguments, OllamaGenerateRequest, OllamaGenerateResponse, TranscriptionResponse,
};

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the speech-to-text and grading model endpoints.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    openai_api_key: Option<String>,
    openai_base_url: String,
    ollama_url: String,
    ollama_model: String,
}

impl InferenceClient {
    pub fn new(
        http: reqwest::Client,
        openai_api_key: Option<String>,
        openai_base_url: impl Into<String>,
        ollama_url: impl Into<String>,
        ollama_model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            openai_api_key,
            openai_base_url: openai_base_url.into(),
            ollama_url: ollama_url.into(),
            ollama_model: ollama_model.into(),
        }
    }

    /// Transcribe a WAV clip with Whisper.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, AppError> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .ok_or(AppError::Unavailable("transcription"))?;
        let part = Part::bytes(wav).file_name("audio.wav").mime_str("audio/wav")?;
        let form = Form::new()
            .part("file", part)
            .text("model", WHISPER_MODEL)
            .text("response_format", "json");
        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.openai_base_url))
            .bearer_auth(api_key)
            .timeout(TRANSCRIBE_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let transcription: TranscriptionResponse =
            check_upstream("whisper", resp).await?.json().await?;
        debug!(chars = transcription.text.len(), "transcribed audio");
        Ok(transcription.text.trim().to_string())
    }

    /// Run a single non-streaming completion.
    pub async fn generate(&self, prompt: String) -> Result<String, AppError> {
        let body = OllamaGenerateRequest {
            model: &self.ollama_model,
            prompt,
            stream: false,
        };
        let resp = self
            .http
            .post(format!("{}/api/generate", self.ollama_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let generated: OllamaGenerateResponse =
            check_upstream("ollama", resp).await?.json().await?;
        Ok(generated.response)
    }

    /// Grade one answer given during a call, folding it into the running grade.
    pub async fn grade_response(&self, args: &GradeArguments) -> Result<String, AppError> {
        let text = self.generate(response_prompt(args)).await?;
        info!(language = %args.language, "graded tool-call response");
        Ok(text.trim().to_string())
    }

    /// Grade a freshly transcribed segment. Returns a single letter grade.
    pub async fn grade_transcript(
        &self,
        transcript: &str,
        current_grade: Option<&str>,
        student: Option<&str>,
    ) -> Result<String, AppError> {
        let text = self
            .generate(transcript_prompt(transcript, current_grade, student))
            .await?;
        parse_letter_grade(&text).ok_or_else(|| AppError::Upstream {
            service: "ollama",
            status: 200,
            body: format!("no letter grade in response: {}", text.trim()),
        })
    }
}

/// Decode tool-call arguments, which arrive either as an object or as a JSON string.
pub fn grade_arguments(arguments: &Value) -> Result<GradeArguments, AppError> {
    let parsed = match arguments {
        Value::Object(_) => serde_json::from_value(arguments.clone()),
        Value::String(s) => serde_json::from_str(s),
        _ => return Err(AppError::Validation("Invalid tool call format".into())),
    };
    parsed.map_err(|e| AppError::Validation(format!("Invalid tool call arguments: {e}")))
}

fn response_prompt(args: &GradeArguments) -> String {
    let GradeArguments {
        response,
        grade,
        language,
        question,
        num_response,
    } = args;
    let (response, grade, language, question, num_response) = (
        response.trim(),
        grade.trim(),
        language.trim(),
        question.trim(),
        num_response.trim(),
    );
    format!(
        "You are grading this user response in a conversation in {language}.\n\
         The user's current grade, based on their performance so far in this conversation, is: {grade}\n\
         Given this response: {response} to this question/statement: {question}, assign scores \
         from 0-100 for clarity, response quality, pronunciation, and grammar, then average them.\n\
         Calculate the final score as [({grade} * {num_response}) + averaged score] / ({num_response} + 1).\n\
         Final grade: below 60 is F, 60-70 is D, 70-80 is C, 80-90 is B, 90-100 is A.\n\
         Output solely the letter of the final grade. Do not return anything else."
    )
}

fn transcript_prompt(transcript: &str, current_grade: Option<&str>, student: Option<&str>) -> String {
    let student = student.unwrap_or("the student");
    let current = current_grade.unwrap_or("none yet");
    format!(
        "You are grading {student}'s spoken language practice.\n\
         Their running grade so far is: {current}\n\
         Here is what they just said:\n{transcript}\n\n\
         Considering clarity, response quality and grammar, and the running grade, assign an \
         updated overall grade of A, B, C, D or F.\n\
         Output solely the letter of the grade. Do not return anything else."
    )
}

/// First standalone A/B/C/D/F token in a model reply.
pub fn parse_letter_grade(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| LETTER_GRADES.contains(token))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, openai_key: Option<&str>) -> InferenceClient {
        InferenceClient::new(
            reqwest::Client::new(),
            openai_key.map(str::to_string),
            server.uri(),
            server.uri(),
            "llama3",
        )
    }

    #[test]
    fn letter_grades_are_extracted() {
        assert_eq!(parse_letter_grade("B").as_deref(), Some("B"));
        assert_eq!(parse_letter_grade("Grade: C\nSummary: ok").as_deref(), Some("C"));
        assert_eq!(parse_letter_grade(" F.").as_deref(), Some("F"));
        assert_eq!(parse_letter_grade("E"), None);
        assert_eq!(parse_letter_grade("Bravo"), None);
    }

    #[test]
    fn tool_arguments_accept_objects_and_strings() {
        let args = grade_arguments(&json!({ "response": "hola", "grade": "A" })).unwrap();
        assert_eq!(args.response, "hola");
        assert_eq!(args.grade, "A");

        let args = grade_arguments(&json!("{\"language\":\"French\"}")).unwrap();
        assert_eq!(args.language, "French");

        assert!(matches!(
            grade_arguments(&Value::Null),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn response_prompt_mentions_inputs() {
        let prompt = response_prompt(&GradeArguments {
            response: " Me llamo Ana ".into(),
            grade: "B".into(),
            language: "Spanish".into(),
            question: "¿Cómo te llamas?".into(),
            num_response: "2".into(),
        });
        assert!(prompt.contains("conversation in Spanish"));
        assert!(prompt.contains("Given this response: Me llamo Ana to"));
        assert!(prompt.contains("[(B * 2) + averaged score] / (2 + 1)"));
    }

    #[tokio::test]
    async fn grade_transcript_parses_model_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3", "stream": false })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "A", "done": true })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let grade = client(&server, None)
            .grade_transcript("Je m'appelle Ana", Some("B"), Some("Ana"))
            .await
            .unwrap();
        assert_eq!(grade, "A");
    }

    #[tokio::test]
    async fn transcription_requires_a_key() {
        let server = MockServer::start().await;
        let err = client(&server, None).transcribe(vec![0; 44]).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable("transcription")));
    }

    #[tokio::test]
    async fn transcription_posts_audio_to_whisper() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": " hola " })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server, Some("sk-test"))
            .transcribe(vec![0; 44])
            .await
            .unwrap();
        assert_eq!(text, "hola");
    }
}
