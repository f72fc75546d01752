//! DingTalk host bridge surface and its awaitable adapters.
//!
//! The host runtime exposes callback-style calls. [`configure`] and
//! [`request_auth_code`] turn each call into a future that settles exactly
//! once, from whichever callback fires first; anything the host fires
//! afterwards is ignored.

use crate::{BridgeError, HandshakeContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// The only JS-API the dashboard asks the host to authorize.
pub const REQUIRED_JS_API: &str = "runtime.permission.requestAuthCode";

/// Invoked by the host when configuration succeeded.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Invoked by the host when a call failed.
pub type ErrorCallback = Box<dyn FnOnce(BridgeError) + Send + 'static>;

/// Invoked by the host with the authorization code result.
pub type AuthCodeCallback = Box<dyn FnOnce(AuthCodeResult) + Send + 'static>;

/// Host runtime bridge (`dd` in the DingTalk in-app browser).
pub trait DingTalkBridge: Send + Sync {
    /// Configure the bridge with a signed JS-API context.
    fn config(&self, options: BridgeConfig, on_ready: ReadyCallback, on_error: ErrorCallback);

    /// Request a one-time authorization code for `corp_id`.
    fn request_auth_code(&self, corp_id: &str, on_success: AuthCodeCallback, on_fail: ErrorCallback);
}

/// Options passed to the host's configuration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub corp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<u64>,
    pub time_stamp: Value,
    pub nonce_str: String,
    pub signature: String,
    pub js_api_list: Vec<String>,
}

impl BridgeConfig {
    /// Build the configuration for a signed context, declaring the single
    /// capability the handshake needs.
    pub fn from_context(context: &HandshakeContext) -> Self {
        Self {
            corp_id: context.corp_id.clone(),
            agent_id: context.agent_id,
            time_stamp: context.timestamp.clone(),
            nonce_str: context.nonce.clone(),
            signature: context.signature.clone(),
            js_api_list: vec![REQUIRED_JS_API.to_string()],
        }
    }
}

/// Result object of the host's authorization-code request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCodeResult {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "authCode")]
    pub auth_code: Option<String>,
}

impl AuthCodeResult {
    /// Result carrying `code`.
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            auth_code: None,
        }
    }

    /// The authorization code: `code` first, then `authCode`; empty values
    /// count as absent.
    pub fn code(&self) -> Option<&str> {
        [self.code.as_deref(), self.auth_code.as_deref()]
            .into_iter()
            .flatten()
            .find(|code| !code.is_empty())
    }
}

/// One-shot settlement shared by competing callbacks.
struct SettleOnce<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for SettleOnce<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> SettleOnce<T> {
    fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Settle with `value`; returns false if already settled.
    fn settle(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                // A dropped receiver means the caller stopped waiting.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }
}

/// Configure the bridge and wait for its ready or error callback.
pub async fn configure(
    bridge: &dyn DingTalkBridge,
    context: &HandshakeContext,
) -> Result<(), BridgeError> {
    let (on_ready, rx) = SettleOnce::channel();
    let on_error = on_ready.clone();

    bridge.config(
        BridgeConfig::from_context(context),
        Box::new(move || {
            if !on_ready.settle(Ok(())) {
                debug!("Ignoring bridge ready callback after settlement");
            }
        }),
        Box::new(move |err| {
            if !on_error.settle(Err(err)) {
                debug!("Ignoring bridge error callback after settlement");
            }
        }),
    );

    rx.await.unwrap_or(Err(BridgeError::Dropped))
}

/// Request an authorization code and wait for the success or fail callback.
pub async fn request_auth_code(
    bridge: &dyn DingTalkBridge,
    corp_id: &str,
) -> Result<AuthCodeResult, BridgeError> {
    let (on_success, rx) = SettleOnce::channel();
    let on_fail = on_success.clone();

    bridge.request_auth_code(
        corp_id,
        Box::new(move |result| {
            if !on_success.settle(Ok(result)) {
                debug!("Ignoring auth code success callback after settlement");
            }
        }),
        Box::new(move |err| {
            if !on_fail.settle(Err(err)) {
                debug!("Ignoring auth code fail callback after settlement");
            }
        }),
    );

    rx.await.unwrap_or(Err(BridgeError::Dropped))
}
