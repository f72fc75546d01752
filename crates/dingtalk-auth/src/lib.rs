//! DingTalk in-app sign-on for the ads dashboard.
//!
//! This crate provides:
//! - The four-stage handshake with the DingTalk host bridge (environment
//!   guard, JS-API signature, bridge configuration, code-for-token exchange)
//! - Per-stage timeouts and a typed, stage-tagged error model
//! - Session persistence and the shared authorization state used by every
//!   authorized request
//! - A bootstrap gate that restores a stored session or runs a single-flight
//!   handshake
//! - An authorized request client that drops the session on 401

mod api_client;
mod authorized;
mod bootstrap;
mod bridge;
mod environment;
mod error;
mod handshake;
mod handshake_fsm;
mod response;
mod session;
mod timeout;

pub use api_client::{canonical_page_url, AuthApiClient, HandshakeContext, LoginPayload};
pub use authorized::{ApiError, ApiResult, AuthorizedClient};
pub use bootstrap::{AuthGate, BootstrapOutcome};
pub use bridge::{
    configure, request_auth_code, AuthCodeCallback, AuthCodeResult, BridgeConfig, DingTalkBridge,
    ErrorCallback, ReadyCallback, REQUIRED_JS_API,
};
pub use environment::{HostEnvironment, ReadyEnvironment};
pub use error::{BridgeError, Stage, StageCause, StageError, StageFailure};
pub use handshake::{DingTalkHandshake, PhaseCallback};
pub use handshake_fsm::handshake_machine;
pub use handshake_fsm::{HandshakeInput, HandshakeMachine, HandshakePhase, HandshakeState};
pub use response::{extract_detail, request_id_from, unwrap_payload};
pub use session::{AuthEvent, AuthorizationState, Session, SessionStore};
pub use timeout::with_timeout;
