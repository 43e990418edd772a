//! tmux-backed session provider.
//!
//! Session handles are tmux targets: a session name (`build`), a pane id
//! (`%3`) or a full `session:window.pane` path.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use switchboard_models::SessionId;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{ProviderError, Result};
use crate::traits::SessionProvider;

/// Drives sessions through the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxProvider {
    tmux_path: PathBuf,
}

impl TmuxProvider {
    /// Locates tmux in `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotAvailable` if tmux is not installed.
    pub fn new() -> Result<Self> {
        let tmux_path = which::which("tmux")
            .map_err(|e| ProviderError::NotAvailable(format!("tmux not found in PATH: {}", e)))?;
        debug!(path = %tmux_path.display(), "tmux found");
        Ok(Self { tmux_path })
    }

    /// Returns true if tmux can be found.
    pub fn is_available() -> bool {
        which::which("tmux").is_ok()
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        trace!(args = ?args, "running tmux command");
        let output = Command::new(&self.tmux_path).args(args).output().await?;
        trace!(
            status = %output.status,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "tmux command completed"
        );
        Ok(output)
    }

    /// Runs a command targeting `session` and maps failures.
    async fn run_checked(&self, session: &str, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_target(&stderr) {
            Err(ProviderError::SessionNotFound(session.to_string()))
        } else {
            Err(ProviderError::CommandFailed(stderr))
        }
    }

    /// Kills a session.
    pub async fn destroy_session(&self, session: &SessionId) -> Result<()> {
        debug!(session = %session, "destroying tmux session");
        self.run_checked(session.as_str(), &["kill-session", "-t", session.as_str()])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for TmuxProvider {
    fn name(&self) -> &str {
        "tmux"
    }

    async fn send(&self, session: &SessionId, text: &str, execute: bool) -> Result<()> {
        debug!(session = %session, execute, len = text.len(), "sending text");
        let target = session.as_str();

        self.run_checked(target, &literal_keys_args(target, text))
            .await?;
        if execute {
            self.run_checked(target, &["send-keys", "-t", target, "Enter"])
                .await?;
        }
        Ok(())
    }

    async fn read(&self, session: &SessionId, max_lines: usize) -> Result<String> {
        let target = session.as_str();
        let start = format!("-{}", max_lines);
        let captured = self
            .run_checked(target, &["capture-pane", "-p", "-t", target, "-S", &start])
            .await?;
        Ok(last_lines(&captured, max_lines))
    }

    async fn create_session(&self, name: &str) -> Result<SessionId> {
        debug!(name = %name, "creating tmux session");
        let output = self
            .run_checked(
                name,
                &["new-session", "-d", "-s", name, "-P", "-F", "#{session_name}"],
            )
            .await?;

        let created = output.trim();
        if created.is_empty() {
            return Err(ProviderError::Parse(
                "tmux did not report the new session name".to_string(),
            ));
        }
        Ok(SessionId::from(created))
    }

    async fn session_exists(&self, session: &SessionId) -> Result<bool> {
        let output = self.run(&["has-session", "-t", session.as_str()]).await?;
        Ok(output.status.success())
    }
}

fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("can't find")
        || stderr.contains("no server running")
        || stderr.contains("session not found")
}

/// Arguments typing `text` into `target` verbatim. `-l` keeps words like
/// "Enter" from being read as key names and `--` keeps a leading `-` from
/// being read as a flag.
fn literal_keys_args<'a>(target: &'a str, text: &'a str) -> [&'a str; 6] {
    ["send-keys", "-t", target, "-l", "--", text]
}

/// Returns the last `max_lines` lines of `captured`, ignoring the blank
/// padding tmux emits below the cursor.
pub fn last_lines(captured: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = captured.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_lines_trims_padding() {
        let captured = "one\ntwo\nthree\n\n\n\n";
        assert_eq!(last_lines(captured, 2), "two\nthree");
        assert_eq!(last_lines(captured, 10), "one\ntwo\nthree");
        assert_eq!(last_lines(captured, 0), "");
    }

    #[test]
    fn test_missing_target_detection() {
        assert!(is_missing_target("can't find session: build"));
        assert!(is_missing_target("no server running on /tmp/tmux-0/default"));
        assert!(!is_missing_target("unknown option -- z"));
    }

    #[test]
    fn test_literal_keys_args_end_options_before_text() {
        assert_eq!(
            literal_keys_args("%3", "-la"),
            ["send-keys", "-t", "%3", "-l", "--", "-la"]
        );
        assert_eq!(literal_keys_args("%3", "Enter")[5], "Enter");
    }

    #[test]
    fn test_new_reports_not_available() {
        // Either tmux is installed or the error is NotAvailable
        if let Err(e) = TmuxProvider::new() {
            assert!(matches!(e, ProviderError::NotAvailable(_)));
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_send_and_read_roundtrip() {
        if !TmuxProvider::is_available() {
            return;
        }
        let tmux = TmuxProvider::new().unwrap();
        let session = tmux.create_session("switchboard-test-io").await.unwrap();

        tmux.send(&session, "echo switchboard-marker", true)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let screen = tmux.read(&session, 20).await.unwrap();
        assert!(screen.contains("switchboard-marker"));

        tmux.destroy_session(&session).await.unwrap();
        assert!(!tmux.session_exists(&session).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_missing_session() {
        if !TmuxProvider::is_available() {
            return;
        }
        let tmux = TmuxProvider::new().unwrap();
        let ghost = SessionId::from("switchboard-no-such-session");
        let result = tmux.send(&ghost, "ls", true).await;
        assert!(matches!(result, Err(ProviderError::SessionNotFound(_))));
    }
}
