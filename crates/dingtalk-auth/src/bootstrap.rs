//! Application bootstrap gate.
//!
//! Decides whether the dashboard may mount: a stored session is restored
//! without touching the network; otherwise the handshake runs, at most once
//! at a time no matter how many callers ask.

use crate::{DingTalkHandshake, HostEnvironment, LoginPayload, Session, Stage, StageError, StageFailure};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

/// How [`AuthGate::ensure_session`] obtained its session.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// A stored session was reused.
    Restored(Session),
    /// A fresh handshake completed.
    Authenticated(LoginPayload),
}

impl BootstrapOutcome {
    pub fn token(&self) -> &str {
        match self {
            BootstrapOutcome::Restored(session) => &session.token,
            BootstrapOutcome::Authenticated(payload) => &payload.token,
        }
    }
}

/// Outcome published by the caller that ran a handshake. `None` until settled.
type Attempt = Option<Result<Session, StageError>>;

enum Claim {
    Lead(watch::Sender<Attempt>),
    Follow(watch::Receiver<Attempt>),
}

pub struct AuthGate {
    handshake: DingTalkHandshake,
    environment: HostEnvironment,
    in_flight: Mutex<Option<watch::Receiver<Attempt>>>,
}

/// Empties the in-flight slot when the leading caller finishes or is dropped.
struct InFlightGuard<'a>(&'a Mutex<Option<watch::Receiver<Attempt>>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl AuthGate {
    pub fn new(handshake: DingTalkHandshake, environment: HostEnvironment) -> Self {
        Self {
            handshake,
            environment,
            in_flight: Mutex::new(None),
        }
    }

    pub fn handshake(&self) -> &DingTalkHandshake {
        &self.handshake
    }

    pub fn environment(&self) -> &HostEnvironment {
        &self.environment
    }

    /// Restore the stored session or run the handshake.
    ///
    /// At most one handshake is in flight. Callers arriving while it runs wait
    /// for it and receive its outcome, failure included, instead of starting
    /// another one.
    pub async fn ensure_session(&self) -> Result<BootstrapOutcome, StageError> {
        loop {
            if let Some(session) = self.restore()? {
                return Ok(BootstrapOutcome::Restored(session));
            }

            let tx = match self.claim() {
                Claim::Lead(tx) => tx,
                Claim::Follow(rx) => match Self::settled(rx).await {
                    Some(outcome) => {
                        debug!("Sharing the outcome of a concurrent handshake");
                        return outcome.map(BootstrapOutcome::Restored);
                    }
                    // The leading caller was dropped before it settled.
                    None => continue,
                },
            };
            let _in_flight = InFlightGuard(&self.in_flight);

            // An earlier attempt may have stored a session after the first check.
            if let Some(session) = self.restore()? {
                tx.send_replace(Some(Ok(session.clone())));
                return Ok(BootstrapOutcome::Restored(session));
            }

            info!("No stored session, starting DingTalk handshake");
            let result = self.handshake.run(&self.environment).await;
            tx.send_replace(Some(result.as_ref().map(Session::from).map_err(Clone::clone)));
            return result.map(BootstrapOutcome::Authenticated);
        }
    }

    fn claim(&self) -> Claim {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(rx) => Claim::Follow(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                *slot = Some(rx);
                Claim::Lead(tx)
            }
        }
    }

    async fn settled(mut rx: watch::Receiver<Attempt>) -> Attempt {
        match rx.wait_for(Option::is_some).await {
            Ok(attempt) => Attempt::clone(&attempt),
            Err(_) => None,
        }
    }

    /// Drop the session. Returns an environment error if there is no storage.
    pub fn logout(&self) -> Result<(), StageError> {
        let session = self.environment.session().ok_or_else(|| {
            StageError::new(
                Stage::Environment,
                StageFailure::new("client-local storage is not available"),
            )
        })?;
        session.clear().map_err(|e| {
            StageError::new(
                Stage::Environment,
                StageFailure::new("failed to clear session").with_cause(e),
            )
        })
    }

    fn restore(&self) -> Result<Option<Session>, StageError> {
        let Some(session) = self.environment.session() else {
            return Ok(None);
        };
        session.restore().map_err(|e| {
            StageError::new(
                Stage::Environment,
                StageFailure::new("failed to read stored session").with_cause(e),
            )
        })
    }
}
