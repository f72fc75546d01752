//! Signing and login endpoint client.

use crate::response::{coerce_u64, non_empty_string, read_json_lenient};
use crate::{
    extract_detail, request_id_from, unwrap_payload, Session, Stage, StageCause, StageError,
    StageFailure,
};
use dash_config_and_utils::{resolve_api_url, CoreResult};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

const JSAPI_SIGN_PATH: &str = "/auth/dingtalk/jsapi-sign";
const LOGIN_PATH: &str = "/auth/dingtalk/login";

/// The page URL as the signing endpoint must see it: fragment removed.
pub fn canonical_page_url(page_url: &Url) -> String {
    let mut canonical = page_url.clone();
    canonical.set_fragment(None);
    canonical.to_string()
}

/// Signed JS-API context returned by the signing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeContext {
    pub corp_id: String,
    pub agent_id: Option<u64>,
    /// Passed to the bridge exactly as the server sent it.
    pub timestamp: Value,
    pub nonce: String,
    pub signature: String,
}

impl HandshakeContext {
    /// Read a context from an unwrapped sign payload.
    pub fn from_payload(payload: &Value) -> Result<Self, StageFailure> {
        let corp_id = non_empty_string(payload.get("corpId"))
            .ok_or_else(|| StageFailure::new("missing corpId in sign response"))?;

        let timestamp = payload.get("timeStamp").cloned().unwrap_or(Value::Null);

        let agent_id = match payload.get("agentId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(raw) => {
                let parsed = coerce_u64(Some(raw));
                if parsed.is_none() {
                    warn!(agent_id = %raw, "Ignoring non-numeric agentId in sign response");
                }
                parsed
            }
        };

        Ok(Self {
            corp_id,
            agent_id,
            timestamp,
            nonce: non_empty_string(payload.get("nonceStr")).unwrap_or_default(),
            signature: non_empty_string(payload.get("signature")).unwrap_or_default(),
        })
    }
}

/// Successful login: token, user and the full unwrapped payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginPayload {
    pub token: String,
    pub user: Option<Value>,
    pub raw: Value,
}

impl From<&LoginPayload> for Session {
    fn from(payload: &LoginPayload) -> Self {
        Session {
            token: payload.token.clone(),
            user: payload.user.clone(),
        }
    }
}

/// A 2xx response body together with its request id.
struct Accepted {
    body: Value,
    request_id: Option<String>,
}

/// Client for the two handshake endpoints.
#[derive(Clone)]
pub struct AuthApiClient {
    http: reqwest::Client,
    sign_url: Url,
    login_url: Url,
}

impl AuthApiClient {
    /// Resolve both endpoints under `api_base` as seen from `page_url`.
    pub fn for_page(http: reqwest::Client, api_base: &str, page_url: &Url) -> CoreResult<Self> {
        Ok(Self {
            http,
            sign_url: resolve_api_url(page_url, api_base, JSAPI_SIGN_PATH)?,
            login_url: resolve_api_url(page_url, api_base, LOGIN_PATH)?,
        })
    }

    pub fn sign_url(&self) -> &Url {
        &self.sign_url
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Obtain a signed JS-API context for `page_url`.
    pub async fn jsapi_sign(&self, page_url: &Url) -> Result<HandshakeContext, StageError> {
        let url = canonical_page_url(page_url);
        debug!(page_url = %url, "Requesting JS-API signature");

        let accepted = self
            .post(Stage::JsapiSign, &self.sign_url, &json!({ "url": url }), "JSAPI sign")
            .await?;

        let payload = unwrap_payload(&accepted.body).unwrap_or(&Value::Null);
        HandshakeContext::from_payload(payload).map_err(|failure| {
            StageError::new(
                Stage::JsapiSign,
                failure
                    .with_request_id(accepted.request_id.clone())
                    .with_detail(extract_detail(&accepted.body)),
            )
        })
    }

    /// Exchange an authorization code for a session token.
    pub async fn login(&self, auth_code: &str) -> Result<LoginPayload, StageError> {
        debug!("Exchanging authorization code");

        let accepted = self
            .post(Stage::Login, &self.login_url, &json!({ "auth_code": auth_code }), "Login")
            .await?;

        let raw = unwrap_payload(&accepted.body).cloned().unwrap_or(Value::Null);
        let token = raw
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if token.is_empty() {
            warn!(request_id = ?accepted.request_id, "Login response carried no token");
            return Err(StageError::new(
                Stage::Login,
                StageFailure::new("missing token in login response")
                    .with_request_id(accepted.request_id)
                    .with_detail(extract_detail(&accepted.body)),
            ));
        }

        let user = raw.get("user").filter(|user| !user.is_null()).cloned();
        Ok(LoginPayload { token, user, raw })
    }

    /// POST `body` and return the parsed 2xx body.
    ///
    /// Non-2xx responses become a stage error carrying status, request id and
    /// the body's detail message; their body is read best-effort.
    async fn post(
        &self,
        stage: Stage,
        url: &Url,
        body: &Value,
        label: &str,
    ) -> Result<Accepted, StageError> {
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                StageError::new(
                    stage,
                    StageFailure::new(format!("{} request failed", label)).with_cause(e),
                )
            })?;

        let status = response.status();
        let request_id = request_id_from(response.headers());

        if !status.is_success() {
            let body = read_json_lenient(response).await.unwrap_or(Value::Null);
            let detail = extract_detail(&body);
            warn!(
                stage = %stage,
                status = status.as_u16(),
                request_id = ?request_id,
                detail = ?detail,
                "Auth endpoint returned an error"
            );
            return Err(StageError::new(
                stage,
                StageFailure::new(format!("{} failed: HTTP {}", label, status.as_u16()))
                    .with_status(status.as_u16())
                    .with_request_id(request_id)
                    .with_detail(detail),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| {
            StageError::new(
                stage,
                StageFailure::new(format!("{} response could not be read", label))
                    .with_status(status.as_u16())
                    .with_request_id(request_id.clone())
                    .with_cause(e),
            )
        })?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                StageError::new(
                    stage,
                    StageFailure::new(format!("{} response is not valid JSON", label))
                        .with_status(status.as_u16())
                        .with_request_id(request_id.clone())
                        .with_cause(StageCause::Decode(e.to_string())),
                )
            })?
        };

        Ok(Accepted { body, request_id })
    }
}
