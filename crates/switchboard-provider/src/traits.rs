//! The session provider seam.

use async_trait::async_trait;
use switchboard_models::SessionId;

use crate::error::Result;

/// Backend that owns live sessions.
///
/// A provider creates sessions, types text into them and captures their
/// output. Calls into a provider are the only points where coordinator tasks
/// suspend.
///
/// # Example
///
/// ```ignore
/// use switchboard_provider::{InMemoryProvider, SessionProvider};
///
/// async fn greet(provider: &dyn SessionProvider, session: &SessionId) {
///     provider.send(session, "echo hello", true).await.unwrap();
///     let screen = provider.read(session, 10).await.unwrap();
///     println!("{}", screen);
/// }
/// ```
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Types `text` into the session, pressing Enter when `execute` is set.
    async fn send(&self, session: &SessionId, text: &str, execute: bool) -> Result<()>;

    /// Returns up to `max_lines` of the session's most recent output.
    async fn read(&self, session: &SessionId, max_lines: usize) -> Result<String>;

    /// Creates a new session and returns its handle.
    async fn create_session(&self, name: &str) -> Result<SessionId>;

    /// Returns true if the handle refers to a live session.
    async fn session_exists(&self, session: &SessionId) -> Result<bool>;
}
