//! Client for requests made on behalf of an authenticated session.

use crate::response::read_json_lenient;
use crate::{extract_detail, request_id_from, unwrap_payload, SessionStore};
use dash_config_and_utils::{normalize_api_base_url, resolve_api_url, CoreError};
use dash_storage::StorageError;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const ME_PATH: &str = "/auth/me";
const REFRESH_USER_PATH: &str = "/auth/dingtalk/refresh-user";

/// Errors from authorized requests.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The server rejected the token; the session has been cleared.
    #[error("Unauthorized: session cleared")]
    Unauthorized,

    /// Non-2xx response other than 401.
    #[error("API error: HTTP {status}{}", .detail.as_ref().map(|d| format!(" - {}", d)).unwrap_or_default())]
    Status {
        status: u16,
        request_id: Option<String>,
        detail: Option<String>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("URL error: {0}")]
    Url(#[from] CoreError),
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;

/// Issues requests carrying `Authorization: Bearer <token>`.
///
/// The token comes from the shared authorization state, or from storage when
/// nothing is attached yet. Any 401 drops the whole session.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    api_base: String,
    origin: Url,
    session: Arc<SessionStore>,
}

impl AuthorizedClient {
    /// `origin` is the page URL relative API bases resolve against.
    pub fn new(api_base: &str, origin: Url, session: Arc<SessionStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: normalize_api_base_url(api_base),
            origin,
            session,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn get_json(&self, path: &str) -> ApiResult<Value> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> ApiResult<Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Current user as seen by the server.
    pub async fn me(&self) -> ApiResult<Value> {
        let body = self.get_json(ME_PATH).await?;
        user_from(&body)
    }

    /// Ask the server to re-read the user from DingTalk, then store and
    /// broadcast the fresh profile.
    pub async fn refresh_user(&self) -> ApiResult<Value> {
        let body = self.post_json(REFRESH_USER_PATH, &json!({})).await?;
        let user = user_from(&body)?;
        self.session.update_user(&user)?;
        Ok(user)
    }

    fn bearer(&self) -> ApiResult<Option<String>> {
        if let Some(bearer) = self.session.authorization().bearer() {
            return Ok(Some(bearer));
        }
        Ok(self
            .session
            .stored_token()?
            .map(|token| format!("Bearer {}", token)))
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResult<Value> {
        let url = resolve_api_url(&self.origin, &self.api_base, path)?;
        debug!(method = %method, url = %url, "Authorized request");

        let mut request = self.http.request(method, url);
        if let Some(bearer) = self.bearer()? {
            request = request.header(reqwest::header::AUTHORIZATION, bearer);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!(path, "Request unauthorized, clearing session");
            if let Err(e) = self.session.clear() {
                warn!(error = %e, "Failed to clear session after 401");
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let request_id = request_id_from(response.headers());
            let detail = read_json_lenient(response)
                .await
                .as_ref()
                .and_then(extract_detail);
            warn!(path, status = status.as_u16(), request_id = ?request_id, "API request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                request_id,
                detail,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn user_from(body: &Value) -> ApiResult<Value> {
    unwrap_payload(body)
        .and_then(|payload| payload.get("user"))
        .filter(|user| user.is_object())
        .cloned()
        .ok_or_else(|| ApiError::Decode("missing user in response".to_string()))
}
