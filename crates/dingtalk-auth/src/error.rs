//! Stage-tagged handshake errors.
//!
//! Every failure of the handshake is a [`StageError`]: the variant names the
//! stage that failed and carries a [`StageFailure`] with the human-readable
//! message, optional HTTP status, request id, server detail, and the
//! underlying [`StageCause`]. None of these are retried by the handshake.

use dash_config_and_utils::CoreError;
use dash_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A discrete step of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Host bridge and client-local storage presence check.
    Environment,
    /// JS-API signature request.
    JsapiSign,
    /// Host bridge configuration.
    Config,
    /// Authorization code request.
    AuthCode,
    /// Code-for-token exchange.
    Login,
}

impl Stage {
    /// Stable wire/display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Environment => "environment",
            Stage::JsapiSign => "jsapi-sign",
            Stage::Config => "config",
            Stage::AuthCode => "auth-code",
            Stage::Login => "login",
        }
    }

    /// Label used in timeout messages.
    pub fn timeout_label(&self) -> String {
        format!("dingtalk {}", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the host bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The host invoked the error/fail callback.
    #[error("bridge rejected the call: {message}")]
    Rejected {
        /// Host-specific error code, if any.
        code: Option<String>,
        /// Host-provided message.
        message: String,
    },

    /// The host dropped both callbacks without invoking either.
    #[error("bridge dropped the callbacks without settling")]
    Dropped,
}

impl BridgeError {
    /// Convenience constructor for a rejection without a code.
    pub fn rejected(message: impl Into<String>) -> Self {
        BridgeError::Rejected {
            code: None,
            message: message.into(),
        }
    }
}

/// Underlying cause of a stage failure.
#[derive(Error, Debug)]
pub enum StageCause {
    /// The stage did not settle within the configured duration.
    #[error("{} timeout after {}ms", .stage.timeout_label(), .after.as_millis())]
    Timeout {
        /// Stage that timed out.
        stage: Stage,
        /// Bound that elapsed.
        after: Duration,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Host bridge rejection.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Response body could not be decoded.
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// Session persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Endpoint resolution failure.
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

/// Payload carried by every [`StageError`] variant.
///
/// Cheap to clone: the cause is shared, so one failure can be handed to every
/// caller waiting on the same handshake.
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Human-readable reason.
    pub message: String,
    /// HTTP status of the failing response, if any.
    pub status: Option<u16>,
    /// Server request id for log correlation.
    pub request_id: Option<String>,
    /// Detail message extracted from the response body.
    pub detail: Option<String>,
    /// Original error.
    pub cause: Option<Arc<StageCause>>,
}

impl StageFailure {
    /// Failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            request_id: None,
            detail: None,
            cause: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<StageCause>) -> Self {
        self.cause = Some(Arc::new(cause.into()));
        self
    }
}

/// A terminal handshake failure, tagged with the stage that produced it.
#[derive(Debug, Clone)]
pub enum StageError {
    Environment(StageFailure),
    JsapiSign(StageFailure),
    Config(StageFailure),
    AuthCode(StageFailure),
    Login(StageFailure),
}

impl StageError {
    /// Build the variant matching `stage`.
    pub fn new(stage: Stage, failure: StageFailure) -> Self {
        match stage {
            Stage::Environment => StageError::Environment(failure),
            Stage::JsapiSign => StageError::JsapiSign(failure),
            Stage::Config => StageError::Config(failure),
            Stage::AuthCode => StageError::AuthCode(failure),
            Stage::Login => StageError::Login(failure),
        }
    }

    /// Timeout error for `stage` after `after` elapsed.
    pub fn timeout(stage: Stage, after: Duration) -> Self {
        let cause = StageCause::Timeout { stage, after };
        StageError::new(stage, StageFailure::new(cause.to_string()).with_cause(cause))
    }

    /// Stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Environment(_) => Stage::Environment,
            StageError::JsapiSign(_) => Stage::JsapiSign,
            StageError::Config(_) => Stage::Config,
            StageError::AuthCode(_) => Stage::AuthCode,
            StageError::Login(_) => Stage::Login,
        }
    }

    pub fn failure(&self) -> &StageFailure {
        match self {
            StageError::Environment(f)
            | StageError::JsapiSign(f)
            | StageError::Config(f)
            | StageError::AuthCode(f)
            | StageError::Login(f) => f,
        }
    }

    pub fn message(&self) -> &str {
        &self.failure().message
    }

    pub fn status(&self) -> Option<u16> {
        self.failure().status
    }

    pub fn request_id(&self) -> Option<&str> {
        self.failure().request_id.as_deref()
    }

    pub fn detail(&self) -> Option<&str> {
        self.failure().detail.as_deref()
    }

    pub fn cause(&self) -> Option<&StageCause> {
        self.failure().cause.as_deref()
    }

    /// Returns true if the stage failed because its timer elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause(), Some(StageCause::Timeout { .. }))
    }

    /// Text for an operator-facing error screen: stage, reason, server detail
    /// and the request id to quote when correlating with server logs.
    pub fn display_for_operator(&self) -> String {
        let mut text = format!("[{}] {}", self.stage(), self.message());
        if let Some(detail) = self.detail() {
            text.push_str(": ");
            text.push_str(detail);
        }
        if let Some(request_id) = self.request_id() {
            text.push_str(&format!(" (request id: {})", request_id));
        }
        text
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage(), self.message())
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
