//! Scriptable in-process session provider.
//!
//! Used by tests and by dry runs. Sends are recorded in order and echoed into
//! the session's screen buffer; reads return the tail of that buffer.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use switchboard_models::SessionId;
use tracing::trace;

use crate::error::{ProviderError, Result};
use crate::traits::SessionProvider;

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub session: SessionId,
    pub text: String,
    pub execute: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    screens: HashMap<SessionId, Vec<String>>,
    sent: Vec<SentText>,
    failing: HashSet<SessionId>,
    delays: HashMap<SessionId, Duration>,
}

/// Provider that keeps sessions in memory.
///
/// By default any handle is accepted and created on first use. A strict
/// provider only knows sessions added with [`InMemoryProvider::add_session`]
/// or [`SessionProvider::create_session`].
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: Mutex<MemoryState>,
    strict: bool,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that rejects unknown sessions.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| ProviderError::CommandFailed(format!("provider state poisoned: {}", e)))
    }

    /// Registers a session with an empty screen.
    pub fn add_session(&self, session: impl Into<SessionId>) -> Result<()> {
        self.lock()?.screens.entry(session.into()).or_default();
        Ok(())
    }

    /// Makes every send and read on `session` fail.
    pub fn fail_session(&self, session: impl Into<SessionId>) -> Result<()> {
        self.lock()?.failing.insert(session.into());
        Ok(())
    }

    /// Delays every send and read on `session`.
    pub fn delay_session(&self, session: impl Into<SessionId>, delay: Duration) -> Result<()> {
        self.lock()?.delays.insert(session.into(), delay);
        Ok(())
    }

    /// Appends output to a session's screen as if a program printed it.
    pub fn push_output(&self, session: impl Into<SessionId>, output: &str) -> Result<()> {
        let mut state = self.lock()?;
        let screen = state.screens.entry(session.into()).or_default();
        screen.extend(output.lines().map(str::to_string));
        Ok(())
    }

    /// All sends so far, in order.
    pub fn sent(&self) -> Result<Vec<SentText>> {
        Ok(self.lock()?.sent.clone())
    }

    /// Texts sent to one session, in order.
    pub fn sent_to(&self, session: &SessionId) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .sent
            .iter()
            .filter(|s| &s.session == session)
            .map(|s| s.text.clone())
            .collect())
    }

    /// Checks failure injection and existence, then applies any delay.
    async fn enter(&self, session: &SessionId) -> Result<()> {
        let delay = {
            let state = self.lock()?;
            if state.failing.contains(session) {
                return Err(ProviderError::CommandFailed(format!(
                    "injected failure for '{}'",
                    session
                )));
            }
            if self.strict && !state.screens.contains_key(session) {
                return Err(ProviderError::SessionNotFound(session.to_string()));
            }
            state.delays.get(session).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, session: &SessionId, text: &str, execute: bool) -> Result<()> {
        self.enter(session).await?;
        trace!(session = %session, execute, "recording send");

        let mut state = self.lock()?;
        state.sent.push(SentText {
            session: session.clone(),
            text: text.to_string(),
            execute,
        });
        let screen = state.screens.entry(session.clone()).or_default();
        screen.extend(text.lines().map(str::to_string));
        Ok(())
    }

    async fn read(&self, session: &SessionId, max_lines: usize) -> Result<String> {
        self.enter(session).await?;

        let state = self.lock()?;
        let screen = state
            .screens
            .get(session)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = screen.len().saturating_sub(max_lines);
        Ok(screen[start..].join("\n"))
    }

    async fn create_session(&self, name: &str) -> Result<SessionId> {
        let session = SessionId::from(name);
        let mut state = self.lock()?;
        if state.screens.contains_key(&session) {
            return Err(ProviderError::CommandFailed(format!(
                "duplicate session: {}",
                name
            )));
        }
        state.screens.insert(session.clone(), Vec::new());
        Ok(session)
    }

    async fn session_exists(&self, session: &SessionId) -> Result<bool> {
        let state = self.lock()?;
        Ok(!self.strict || state.screens.contains_key(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_is_recorded_and_echoed() {
        let provider = InMemoryProvider::new();
        let session = SessionId::from("%1");

        provider.send(&session, "make build", true).await.unwrap();
        provider.send(&session, "draft", false).await.unwrap();

        let sent = provider.sent().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].execute);
        assert!(!sent[1].execute);
        assert_eq!(provider.read(&session, 10).await.unwrap(), "make build\ndraft");
    }

    #[tokio::test]
    async fn test_read_returns_tail() {
        let provider = InMemoryProvider::new();
        provider.push_output("s", "a\nb\nc\nd").unwrap();
        let out = provider.read(&SessionId::from("s"), 2).await.unwrap();
        assert_eq!(out, "c\nd");
    }

    #[tokio::test]
    async fn test_strict_rejects_unknown_session() {
        let provider = InMemoryProvider::strict();
        provider.add_session("known").unwrap();

        assert!(provider.send(&"known".into(), "ls", true).await.is_ok());
        let err = provider.send(&"ghost".into(), "ls", true).await.unwrap_err();
        assert!(matches!(err, ProviderError::SessionNotFound(_)));
        assert!(!provider.session_exists(&"ghost".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let provider = InMemoryProvider::new();
        provider.fail_session("%2").unwrap();

        let result = provider.send(&"%2".into(), "ls", true).await;
        assert!(matches!(result, Err(ProviderError::CommandFailed(_))));
        assert!(provider.sent().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_cancellable() {
        let provider = Arc::new(InMemoryProvider::new());
        provider
            .delay_session("slow", Duration::from_secs(30))
            .unwrap();

        let session = SessionId::from("slow");
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            provider.send(&session, "ls", true),
        )
        .await;

        assert!(result.is_err());
        assert!(provider.sent_to(&session).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_session_rejects_duplicates() {
        let provider = InMemoryProvider::strict();
        let session = provider.create_session("build").await.unwrap();
        assert_eq!(session.as_str(), "build");
        assert!(provider.session_exists(&session).await.unwrap());
        assert!(provider.create_session("build").await.is_err());
    }
}
