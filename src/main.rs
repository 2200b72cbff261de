mod auth;
mod config;
mod db_types;
mod error;
mod grading;
mod handlers;
mod openai_types;
mod poller;
mod registry;
mod relay;
mod socket;
mod store;
mod types;
mod utils;
mod vapi;
mod vapi_types;
mod webhook;

use crate::auth::SupabaseAuth;
use crate::config::Config;
use crate::grading::InferenceClient;
use crate::registry::CallRegistry;
use crate::relay::EventRelay;
use crate::store::Store;
use crate::types::AppState;
use crate::vapi::VapiClient;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const DEFAULT_PORT: u16 = 5000;
    pub const DEFAULT_VAPI_BASE_URL: &str = "https://api.vapi.ai";
    pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
    pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";
    pub const DEFAULT_POLL_ATTEMPTS: u32 = 30;
    pub const DEFAULT_POLL_DELAY_MILLIS: u64 = 2_000;
    pub const ASSISTANT_NAME_MAX_CHARS: usize = 30;
    pub const DEFAULT_ASSISTANT_NAME: &str = "Assistant";
    pub const UNKNOWN_STUDENT: &str = "Unknown Student";
    pub const KNOWLEDGE_BASE_PROVIDER: &str = "google";
    pub const WHISPER_MODEL: &str = "whisper-1";
    pub const LETTER_GRADES: &[&str] = &["A", "B", "C", "D", "F"];
    /// Knowledge-base uploads and raw audio arrays exceed the 2MB default body limit.
    pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start-call", post(handlers::start_call))
        .route("/create-assistant", post(handlers::create_assistant))
        .route("/active-calls", get(handlers::active_calls))
        .route("/vapi-webhook", post(handlers::vapi_webhook))
        .route("/api/assistants", get(handlers::list_assistants))
        .route("/teacher/assistants", get(handlers::teacher_assistants))
        .route("/assistants/by-key/:key", get(handlers::assistants_by_key))
        .route("/delete-assistant/:id", delete(handlers::delete_assistant))
        .route("/teacher-calls", get(handlers::teacher_calls))
        .route("/mark-call-viewed/:id", patch(handlers::mark_call_viewed))
        .route("/upload-file", post(handlers::upload_file))
        .route("/send-control-message", post(handlers::send_control_message))
        .route("/get-grade", post(handlers::get_grade))
        .route("/transcribe-audio", post(handlers::transcribe_audio))
        .route("/grade-transcript", post(handlers::grade_transcript))
        .route("/teacher", get(socket::teacher_ws_handler))
        .route("/ws", get(socket::student_ws_handler))
        .route("/", get(|| async { "Language practice call bridge" }))
        .layer(DefaultBodyLimit::max(consts::MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // a missing .env is fine in deployments that set the environment directly
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("tower_http", tracing_subscriber::filter::LevelFilter::DEBUG),
            ("call_bridge", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;
    info!(?config, "loaded configuration");
    let http_client = reqwest::Client::new();

    let store = match config.database_url.as_deref() {
        Some(url) => Some(Store::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set -- running without persistence");
            None
        }
    };
    let auth = match config.supabase.as_ref() {
        Some(supabase) => Some(SupabaseAuth::new(
            http_client.clone(),
            supabase.url.clone(),
            supabase.service_key.clone(),
        )),
        None => {
            warn!("SUPABASE_URL/SUPABASE_SERVICE_KEY not set -- teacher routes will reject");
            None
        }
    };

    let app_state = Arc::new(AppState {
        vapi: VapiClient::new(
            http_client.clone(),
            config.vapi_base_url.clone(),
            config.vapi_api_key.clone(),
            config.vapi_phone_number_id.clone(),
        ),
        poll_policy: config.poll_policy,
        registry: CallRegistry::new(),
        relay: EventRelay::new(),
        store,
        auth,
        inference: InferenceClient::new(
            http_client,
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        ),
    });

    let app = build_router(app_state);
    info!(addr = %config.bind_addr, "listening");
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
