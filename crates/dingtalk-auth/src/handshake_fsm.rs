//! Handshake state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! Start ──EnvironmentReady──► EnvironmentChecked ──ContextSigned──► Signed
//!                                                                    │
//!                                                   BridgeConfigured │
//!                                                                    ▼
//! SessionEstablished ◄──SessionPersisted── CodeObtained ◄──CodeReceived── Configured
//!
//! Any non-terminal state ──Fail──► Failed
//! ```
//!
//! The path only moves forward. There is no retry state: a caller that wants
//! another attempt starts a fresh machine.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub handshake_machine(Start)

    Start => {
        EnvironmentReady => EnvironmentChecked,
        Fail => Failed
    },
    EnvironmentChecked => {
        ContextSigned => Signed,
        Fail => Failed
    },
    Signed => {
        BridgeConfigured => Configured,
        Fail => Failed
    },
    Configured => {
        CodeReceived => CodeObtained,
        Fail => Failed
    },
    CodeObtained => {
        SessionPersisted => SessionEstablished,
        Fail => Failed
    }
}

pub use handshake_machine::Input as HandshakeInput;
pub use handshake_machine::State as HandshakeState;
pub use handshake_machine::StateMachine as HandshakeMachine;

/// Handshake progress as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakePhase {
    Start,
    EnvironmentChecked,
    Signed,
    Configured,
    CodeObtained,
    SessionEstablished,
    Failed,
}

impl HandshakePhase {
    /// Returns true once the handshake can no longer move.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakePhase::SessionEstablished | HandshakePhase::Failed)
    }
}

impl From<&HandshakeState> for HandshakePhase {
    fn from(state: &HandshakeState) -> Self {
        match state {
            HandshakeState::Start => HandshakePhase::Start,
            HandshakeState::EnvironmentChecked => HandshakePhase::EnvironmentChecked,
            HandshakeState::Signed => HandshakePhase::Signed,
            HandshakeState::Configured => HandshakePhase::Configured,
            HandshakeState::CodeObtained => HandshakePhase::CodeObtained,
            HandshakeState::SessionEstablished => HandshakePhase::SessionEstablished,
            HandshakeState::Failed => HandshakePhase::Failed,
        }
    }
}
