//! Host environment guard.

use crate::{DingTalkBridge, SessionStore, Stage, StageError, StageFailure};
use std::sync::Arc;
use url::Url;

/// What the handshake needs from its host: client-local storage with an
/// event channel, the page URL, and the DingTalk bridge.
///
/// Any of these may be missing, e.g. when the dashboard is opened outside the
/// DingTalk client.
#[derive(Clone, Default)]
pub struct HostEnvironment {
    session: Option<Arc<SessionStore>>,
    bridge: Option<Arc<dyn DingTalkBridge>>,
    page_url: Option<Url>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn DingTalkBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_page_url(mut self, page_url: Url) -> Self {
        self.page_url = Some(page_url);
        self
    }

    pub fn session(&self) -> Option<&Arc<SessionStore>> {
        self.session.as_ref()
    }

    /// Verify every collaborator is present.
    ///
    /// Synchronous and side-effect free: no network or bridge call is made.
    pub fn check(&self) -> Result<ReadyEnvironment<'_>, StageError> {
        let fail = |message: &str| StageError::new(Stage::Environment, StageFailure::new(message));

        let session = self
            .session
            .as_deref()
            .ok_or_else(|| fail("client-local storage is not available"))?;
        let page_url = self
            .page_url
            .as_ref()
            .ok_or_else(|| fail("page URL is not available"))?;
        let bridge = self
            .bridge
            .as_deref()
            .ok_or_else(|| fail("DingTalk bridge is not available; open the dashboard inside DingTalk"))?;

        Ok(ReadyEnvironment {
            session,
            bridge,
            page_url,
        })
    }
}

/// A checked environment; every collaborator is present.
pub struct ReadyEnvironment<'a> {
    session: &'a SessionStore,
    bridge: &'a dyn DingTalkBridge,
    page_url: &'a Url,
}

impl<'a> ReadyEnvironment<'a> {
    pub fn session(&self) -> &'a SessionStore {
        self.session
    }

    pub fn bridge(&self) -> &'a dyn DingTalkBridge {
        self.bridge
    }

    pub fn page_url(&self) -> &'a Url {
        self.page_url
    }
}
