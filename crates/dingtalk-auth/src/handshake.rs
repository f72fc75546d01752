//! DingTalk sign-on handshake.
//!
//! Runs the stages strictly in order, each suspending stage under the shared
//! timeout, and stops at the first failure:
//!
//! 1. environment guard (synchronous, untimed)
//! 2. JS-API signature for the current page
//! 3. bridge configuration
//! 4. authorization code request
//! 5. code-for-token exchange, then session persistence
//!
//! Each invocation is independent: a fresh state machine is created per run
//! and nothing is cached between runs.

use crate::bridge;
use crate::handshake_fsm::{HandshakeInput, HandshakeMachine, HandshakePhase};
use crate::{
    with_timeout, AuthApiClient, HostEnvironment, LoginPayload, Stage, StageError, StageFailure,
};
use dash_config_and_utils::{normalize_api_base_url, Config, DEFAULT_AUTH_TIMEOUT_MS};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback invoked on every handshake phase change.
pub type PhaseCallback = Box<dyn Fn(HandshakePhase) + Send + Sync>;

/// The handshake runner.
pub struct DingTalkHandshake {
    http: reqwest::Client,
    api_base_url: String,
    timeout: Duration,
    phase_callback: Mutex<Option<Arc<dyn Fn(HandshakePhase) + Send + Sync>>>,
}

impl DingTalkHandshake {
    /// Create a handshake against `api_base_url` with one shared stage timeout.
    pub fn new(api_base_url: &str, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS)
        } else {
            timeout
        };
        Self {
            http: reqwest::Client::new(),
            api_base_url: normalize_api_base_url(api_base_url),
            timeout,
            phase_callback: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_base_url(), config.auth_timeout())
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Set a callback to be notified of phase changes.
    pub fn set_phase_callback(&self, callback: PhaseCallback) {
        *self
            .phase_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(callback));
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Run the whole handshake.
    ///
    /// On success the session is persisted and its token is attached to the
    /// shared authorization state before this returns.
    pub async fn run(&self, env: &HostEnvironment) -> Result<LoginPayload, StageError> {
        let mut machine = HandshakeMachine::new();

        match self.drive(&mut machine, env).await {
            Ok(payload) => Ok(payload),
            Err(err) => {
                warn!(
                    stage = %err.stage(),
                    request_id = ?err.request_id(),
                    status = ?err.status(),
                    error = %err.message(),
                    "DingTalk handshake failed"
                );
                self.transition(&mut machine, HandshakeInput::Fail);
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        machine: &mut HandshakeMachine,
        env: &HostEnvironment,
    ) -> Result<LoginPayload, StageError> {
        let ready = env.check()?;
        self.transition(machine, HandshakeInput::EnvironmentReady);

        let client = AuthApiClient::for_page(self.http.clone(), &self.api_base_url, ready.page_url())
            .map_err(|e| {
                StageError::new(
                    Stage::Environment,
                    StageFailure::new("could not resolve auth endpoints").with_cause(e),
                )
            })?;

        let context = with_timeout(
            Stage::JsapiSign,
            self.timeout,
            client.jsapi_sign(ready.page_url()),
        )
        .await??;
        self.transition(machine, HandshakeInput::ContextSigned);

        with_timeout(
            Stage::Config,
            self.timeout,
            bridge::configure(ready.bridge(), &context),
        )
        .await?
        .map_err(|e| {
            StageError::new(
                Stage::Config,
                StageFailure::new(format!("dingtalk config failed: {}", e)).with_cause(e),
            )
        })?;
        self.transition(machine, HandshakeInput::BridgeConfigured);

        let result = with_timeout(
            Stage::AuthCode,
            self.timeout,
            bridge::request_auth_code(ready.bridge(), &context.corp_id),
        )
        .await?
        .map_err(|e| {
            StageError::new(
                Stage::AuthCode,
                StageFailure::new(format!("dingtalk auth code request failed: {}", e))
                    .with_cause(e),
            )
        })?;
        let code = result
            .code()
            .ok_or_else(|| StageError::new(Stage::AuthCode, StageFailure::new("auth code is empty")))?
            .to_string();
        self.transition(machine, HandshakeInput::CodeReceived);

        let payload = with_timeout(Stage::Login, self.timeout, client.login(&code)).await??;

        ready
            .session()
            .save(&payload.token, payload.user.as_ref())
            .map_err(|e| {
                StageError::new(
                    Stage::Login,
                    StageFailure::new("failed to persist session").with_cause(e),
                )
            })?;
        self.transition(machine, HandshakeInput::SessionPersisted);

        info!(corp_id = %context.corp_id, "DingTalk session established");
        Ok(payload)
    }

    fn transition(&self, machine: &mut HandshakeMachine, input: HandshakeInput) {
        let old_phase = HandshakePhase::from(machine.state());
        if machine.consume(&input).is_err() {
            warn!(phase = ?old_phase, input = ?input, "Ignoring invalid handshake transition");
            return;
        }
        let new_phase = HandshakePhase::from(machine.state());

        debug!(old_phase = ?old_phase, new_phase = ?new_phase, "Handshake transition");

        // Invoked outside the lock so the callback may replace itself.
        let callback = self
            .phase_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(new_phase);
        }
    }
}
