//! Playbook types.
//!
//! A playbook is an ordered list of command stages, an optional trailing
//! cascade and an optional read-back. Playbooks are usually loaded from JSON:
//!
//! ```json
//! {
//!   "name": "release",
//!   "commands": [
//!     {"name": "build", "parallel": true, "messages": [
//!       {"content": "make", "targets": [{"by": "team", "value": "backend"}]}
//!     ]}
//!   ],
//!   "read_targets": [{"by": "agent", "value": "builder"}]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::cascade::CascadingMessage;
use crate::target::SessionTarget;

fn default_execute() -> bool {
    true
}

/// One message within a command stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookMessage {
    /// Text to send.
    pub content: String,

    /// Recipients.
    pub targets: SessionTarget,

    /// Whether to press Enter after typing the content.
    #[serde(default = "default_execute")]
    pub execute: bool,
}

impl PlaybookMessage {
    /// Creates a message that is executed on delivery.
    pub fn new(content: impl Into<String>, targets: SessionTarget) -> Self {
        Self {
            content: content.into(),
            targets,
            execute: true,
        }
    }

    /// Types the content without executing it.
    pub fn typed_only(mut self) -> Self {
        self.execute = false;
        self
    }
}

/// A named stage of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookCommand {
    pub name: String,

    pub messages: Vec<PlaybookMessage>,

    /// Dispatch all messages concurrently and join, instead of in order.
    #[serde(default)]
    pub parallel: bool,

    /// Stage timeout in milliseconds, overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl PlaybookCommand {
    /// Creates a sequential stage.
    pub fn sequential(name: impl Into<String>, messages: Vec<PlaybookMessage>) -> Self {
        Self {
            name: name.into(),
            messages,
            parallel: false,
            timeout_ms: None,
        }
    }

    /// Creates a parallel stage.
    pub fn parallel(name: impl Into<String>, messages: Vec<PlaybookMessage>) -> Self {
        Self {
            parallel: true,
            ..Self::sequential(name, messages)
        }
    }

    /// Sets the stage timeout.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// An ordered set of stages plus optional cascade and read-back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub commands: Vec<PlaybookCommand>,

    /// Cascade dispatched after all commands complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadingMessage>,

    /// Sessions whose output is collected at the end.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_targets: Vec<SessionTarget>,

    /// Agent running the playbook. Sessions it owns are writable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_by: Option<String>,

    /// Lines of output to read back per session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_lines: Option<usize>,
}

impl Playbook {
    /// Creates an empty playbook.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a stage.
    pub fn with_command(mut self, command: PlaybookCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Sets the trailing cascade.
    pub fn with_cascade(mut self, cascade: CascadingMessage) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Adds a read-back target.
    pub fn with_read_target(mut self, target: SessionTarget) -> Self {
        self.read_targets.push(target);
        self
    }

    /// Sets the invoking agent.
    pub fn invoked_by(mut self, agent: impl Into<String>) -> Self {
        self.invoked_by = Some(agent.into());
        self
    }

    /// Returns true if running the playbook would do nothing.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.cascade.is_none() && self.read_targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playbook_json() {
        let json = r#"{
            "name": "release",
            "commands": [
                {"name": "build", "parallel": true, "messages": [
                    {"content": "make", "targets": [{"by": "team", "value": "backend"}]},
                    {"content": "npm run build", "targets": [{"by": "agent", "value": "web"}], "execute": false}
                ]},
                {"name": "test", "timeout_ms": 5000, "messages": [
                    {"content": "make test", "targets": [{"by": "name", "value": "%4"}]}
                ]}
            ],
            "cascade": {"broadcast": "done"},
            "read_targets": [[{"by": "agent", "value": "web"}]]
        }"#;

        let playbook: Playbook = serde_json::from_str(json).unwrap();
        assert_eq!(playbook.name, "release");
        assert_eq!(playbook.commands.len(), 2);

        let build = &playbook.commands[0];
        assert!(build.parallel);
        assert!(build.messages[0].execute);
        assert!(!build.messages[1].execute);

        let test = &playbook.commands[1];
        assert!(!test.parallel);
        assert_eq!(test.timeout_ms, Some(5000));

        assert_eq!(
            playbook.cascade.as_ref().unwrap().broadcast.as_deref(),
            Some("done")
        );
        assert_eq!(playbook.read_targets.len(), 1);
    }

    #[test]
    fn test_builder() {
        let playbook = Playbook::new("p")
            .with_command(PlaybookCommand::parallel(
                "stage",
                vec![PlaybookMessage::new("ls", SessionTarget::team("t")).typed_only()],
            ))
            .invoked_by("lead");

        assert!(!playbook.is_empty());
        assert!(playbook.commands[0].parallel);
        assert!(!playbook.commands[0].messages[0].execute);
        assert_eq!(playbook.invoked_by.as_deref(), Some("lead"));
    }

    #[test]
    fn test_empty_playbook() {
        assert!(Playbook::new("nothing").is_empty());
    }
}
