use crate::error::{check_upstream, AppError};
use crate::types::AppState;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// A user as reported by the auth service's `/auth/v1/user` endpoint.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies dashboard access tokens against the managed auth service.
#[derive(Clone)]
pub struct SupabaseAuth {
    http: reqwest::Client,
    url: String,
    service_key: String,
}

impl SupabaseAuth {
    pub fn new(http: reqwest::Client, url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            service_key: service_key.into(),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<AuthUser, AppError> {
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.url))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .timeout(AUTH_TIMEOUT)
            .send()
            .await?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("auth service rejected token");
                Err(AppError::Unauthorized("invalid or expired token"))
            }
            _ => Ok(check_upstream("supabase auth", resp).await?.json().await?),
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for routes that need a signed-in teacher.
///
/// Rejects with 401 when the header is missing, the token is invalid, or auth is not
/// configured at all.
pub struct AuthenticatedTeacher(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedTeacher {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(auth) = state.auth.as_ref() else {
            warn!("auth is not configured -- rejecting request");
            return Err(AppError::Unauthorized("authentication is not configured"));
        };
        let token =
            bearer_token(parts).ok_or(AppError::Unauthorized("missing bearer token"))?;
        auth.verify(token).await.map(AuthenticatedTeacher)
    }
}

/// Like `AuthenticatedTeacher`, but anonymous requests pass through as `None`. A token that is
/// present must still be valid.
pub struct MaybeTeacher(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeTeacher {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match (bearer_token(parts), state.auth.as_ref()) {
            (Some(token), Some(auth)) => Ok(MaybeTeacher(Some(auth.verify(token).await?))),
            _ => Ok(MaybeTeacher(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_ID: &str = "2f1c6f0e-8d1e-4a53-9c57-3c1f8f0f9a11";

    #[tokio::test]
    async fn verify_returns_the_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "service"))
            .and(header("authorization", "Bearer good"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": USER_ID, "email": "t@school.edu" })),
            )
            .mount(&server)
            .await;

        let auth = SupabaseAuth::new(reqwest::Client::new(), server.uri(), "service");
        let user = auth.verify("good").await.unwrap();
        assert_eq!(user.id, Uuid::parse_str(USER_ID).unwrap());
        assert_eq!(user.email.as_deref(), Some("t@school.edu"));
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "bad jwt" })))
            .mount(&server)
            .await;

        let auth = SupabaseAuth::new(reqwest::Client::new(), server.uri(), "service");
        let err = auth.verify("bad").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn bearer_token_parsing() {
        let (parts, _) = Request::builder()
            .header("authorization", "Bearer abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc"));

        let (parts, _) = Request::builder()
            .header("authorization", "Basic abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
