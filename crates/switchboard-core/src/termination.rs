//! Composable termination conditions for watching session output.
//!
//! ```
//! use std::time::Duration;
//! use switchboard_core::termination::TerminationCondition;
//!
//! let done = TerminationCondition::text_mention("DONE", true)
//!     .or(TerminationCondition::timeout(Duration::from_secs(300)).unwrap());
//! ```

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{CoreError, Result};

/// Output patterns that indicate a failure.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    r"(?i)error:",
    r"(?i)exception:",
    r"(?i)fatal:",
    r"(?i)failed:",
    r"(?i)traceback",
];

/// What a condition is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct TerminationContext {
    /// Number of output changes observed so far.
    pub message_count: usize,
    /// Most recent captured output.
    pub last_output: String,
    /// Time since watching started.
    pub elapsed: Duration,
    /// When output last changed, if it ever did.
    pub last_output_at: Option<Instant>,
}

/// A condition that ends a watch.
#[derive(Debug, Clone)]
pub enum TerminationCondition {
    MaxMessages(usize),
    TextMention { text: String, case_sensitive: bool },
    Timeout(Duration),
    OutputPattern(Regex),
    NoOutputFor(Duration),
    ErrorDetected(Vec<Regex>),
    /// Met when any inner condition is met.
    Any(Vec<TerminationCondition>),
    /// Met when every inner condition is met.
    All(Vec<TerminationCondition>),
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| CoreError::validation(format!("invalid pattern '{}': {}", pattern, e)))
}

fn positive(duration: Duration, what: &str) -> Result<Duration> {
    if duration.is_zero() {
        return Err(CoreError::validation(format!("{} must be positive", what)));
    }
    Ok(duration)
}

impl TerminationCondition {
    pub fn max_messages(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(CoreError::validation("max_messages must be positive"));
        }
        Ok(Self::MaxMessages(count))
    }

    pub fn text_mention(text: impl Into<String>, case_sensitive: bool) -> Self {
        Self::TextMention {
            text: text.into(),
            case_sensitive,
        }
    }

    pub fn timeout(duration: Duration) -> Result<Self> {
        Ok(Self::Timeout(positive(duration, "timeout")?))
    }

    pub fn output_pattern(pattern: &str) -> Result<Self> {
        Ok(Self::OutputPattern(compile(pattern)?))
    }

    pub fn no_output_for(duration: Duration) -> Result<Self> {
        Ok(Self::NoOutputFor(positive(duration, "no_output_for")?))
    }

    /// Error detection with [`DEFAULT_ERROR_PATTERNS`] when `patterns` is empty.
    pub fn error_detected(patterns: &[String]) -> Result<Self> {
        let compiled = if patterns.is_empty() {
            DEFAULT_ERROR_PATTERNS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<Vec<_>>>()?
        } else {
            patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self::ErrorDetected(compiled))
    }

    /// Combines with `other`; met when either is met.
    pub fn or(self, other: TerminationCondition) -> Self {
        match self {
            Self::Any(mut inner) => {
                inner.push(other);
                Self::Any(inner)
            }
            first => Self::Any(vec![first, other]),
        }
    }

    /// Combines with `other`; met when both are met.
    pub fn and(self, other: TerminationCondition) -> Self {
        match self {
            Self::All(mut inner) => {
                inner.push(other);
                Self::All(inner)
            }
            first => Self::All(vec![first, other]),
        }
    }

    /// Evaluates the condition.
    pub fn is_met(&self, ctx: &TerminationContext) -> bool {
        match self {
            Self::MaxMessages(max) => ctx.message_count >= *max,
            Self::TextMention {
                text,
                case_sensitive: true,
            } => ctx.last_output.contains(text.as_str()),
            Self::TextMention {
                text,
                case_sensitive: false,
            } => ctx
                .last_output
                .to_lowercase()
                .contains(&text.to_lowercase()),
            Self::Timeout(limit) => ctx.elapsed >= *limit,
            Self::OutputPattern(regex) => regex.is_match(&ctx.last_output),
            Self::NoOutputFor(limit) => ctx
                .last_output_at
                .is_some_and(|at| at.elapsed() >= *limit),
            Self::ErrorDetected(patterns) => patterns.iter().any(|p| p.is_match(&ctx.last_output)),
            Self::Any(inner) => inner.iter().any(|c| c.is_met(ctx)),
            Self::All(inner) => inner.iter().all(|c| c.is_met(ctx)),
        }
    }

    /// Short description for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Self::MaxMessages(n) => format!("max_messages({})", n),
            Self::TextMention { text, .. } => format!("text_mention({:?})", text),
            Self::Timeout(d) => format!("timeout({}s)", d.as_secs_f64()),
            Self::OutputPattern(r) => format!("output_pattern({})", r.as_str()),
            Self::NoOutputFor(d) => format!("no_output_for({}s)", d.as_secs_f64()),
            Self::ErrorDetected(p) => format!("error_detected({} patterns)", p.len()),
            Self::Any(inner) => format!(
                "any[{}]",
                inner.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
            ),
            Self::All(inner) => format!(
                "all[{}]",
                inner.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Serializable description of a condition.
///
/// ```json
/// {"type": "any", "conditions": [
///   {"type": "text_mention", "text": "DONE"},
///   {"type": "timeout", "seconds": 300}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminationSpec {
    MaxMessages {
        count: usize,
    },
    TextMention {
        text: String,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    Timeout {
        seconds: u64,
    },
    OutputPattern {
        pattern: String,
    },
    NoOutputFor {
        seconds: u64,
    },
    ErrorDetected {
        #[serde(default)]
        patterns: Vec<String>,
    },
    Any {
        conditions: Vec<TerminationSpec>,
    },
    All {
        conditions: Vec<TerminationSpec>,
    },
}

impl TerminationSpec {
    /// Builds the condition, validating every value.
    pub fn compile(&self) -> Result<TerminationCondition> {
        match self {
            Self::MaxMessages { count } => TerminationCondition::max_messages(*count),
            Self::TextMention {
                text,
                case_sensitive,
            } => {
                if text.is_empty() {
                    return Err(CoreError::validation("text_mention needs non-empty text"));
                }
                Ok(TerminationCondition::text_mention(text, *case_sensitive))
            }
            Self::Timeout { seconds } => {
                TerminationCondition::timeout(Duration::from_secs(*seconds))
            }
            Self::OutputPattern { pattern } => TerminationCondition::output_pattern(pattern),
            Self::NoOutputFor { seconds } => {
                TerminationCondition::no_output_for(Duration::from_secs(*seconds))
            }
            Self::ErrorDetected { patterns } => TerminationCondition::error_detected(patterns),
            Self::Any { conditions } => Ok(TerminationCondition::Any(compile_all(conditions)?)),
            Self::All { conditions } => Ok(TerminationCondition::All(compile_all(conditions)?)),
        }
    }
}

fn compile_all(specs: &[TerminationSpec]) -> Result<Vec<TerminationCondition>> {
    if specs.is_empty() {
        return Err(CoreError::validation("combined condition needs at least one member"));
    }
    specs.iter().map(TerminationSpec::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(output: &str) -> TerminationContext {
        TerminationContext {
            last_output: output.to_string(),
            ..TerminationContext::default()
        }
    }

    #[test]
    fn test_max_messages() {
        let cond = TerminationCondition::max_messages(3).unwrap();
        let mut c = ctx("");
        c.message_count = 2;
        assert!(!cond.is_met(&c));
        c.message_count = 3;
        assert!(cond.is_met(&c));
        assert!(TerminationCondition::max_messages(0).is_err());
    }

    #[test]
    fn test_text_mention_case() {
        let sensitive = TerminationCondition::text_mention("DONE", true);
        let insensitive = TerminationCondition::text_mention("DONE", false);
        assert!(!sensitive.is_met(&ctx("all done")));
        assert!(insensitive.is_met(&ctx("all done")));
        assert!(sensitive.is_met(&ctx("DONE.")));
    }

    #[test]
    fn test_timeout() {
        let cond = TerminationCondition::timeout(Duration::from_secs(10)).unwrap();
        let mut c = ctx("");
        c.elapsed = Duration::from_secs(9);
        assert!(!cond.is_met(&c));
        c.elapsed = Duration::from_secs(10);
        assert!(cond.is_met(&c));
        assert!(TerminationCondition::timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn test_output_pattern() {
        let cond = TerminationCondition::output_pattern(r"tests? passed: \d+").unwrap();
        assert!(cond.is_met(&ctx("12 tests passed: 12")));
        assert!(!cond.is_met(&ctx("running")));
        assert!(TerminationCondition::output_pattern("(").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_output_for() {
        let cond = TerminationCondition::no_output_for(Duration::from_secs(5)).unwrap();
        let mut c = ctx("");
        assert!(!cond.is_met(&c));

        c.last_output_at = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!cond.is_met(&c));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cond.is_met(&c));
    }

    #[test]
    fn test_error_detected_defaults() {
        let cond = TerminationCondition::error_detected(&[]).unwrap();
        assert!(cond.is_met(&ctx("Traceback (most recent call last)")));
        assert!(cond.is_met(&ctx("ERROR: disk full")));
        assert!(!cond.is_met(&ctx("0 errors")));
    }

    #[test]
    fn test_combinators() {
        let any = TerminationCondition::text_mention("a", true)
            .or(TerminationCondition::text_mention("b", true))
            .or(TerminationCondition::text_mention("c", true));
        match &any {
            TerminationCondition::Any(inner) => assert_eq!(inner.len(), 3),
            other => panic!("expected Any, got {:?}", other),
        }
        assert!(any.is_met(&ctx("c")));

        let all = TerminationCondition::text_mention("a", true)
            .and(TerminationCondition::text_mention("b", true));
        assert!(!all.is_met(&ctx("a")));
        assert!(all.is_met(&ctx("ab")));
    }

    #[test]
    fn test_spec_compile() {
        let spec: TerminationSpec = serde_json::from_str(
            r#"{"type":"any","conditions":[
                {"type":"text_mention","text":"DONE"},
                {"type":"max_messages","count":100}
            ]}"#,
        )
        .unwrap();

        let cond = spec.compile().unwrap();
        assert!(cond.is_met(&ctx("DONE")));
        assert_eq!(cond.describe(), "any[text_mention(\"DONE\"), max_messages(100)]");
    }

    #[test]
    fn test_spec_rejects_invalid_values() {
        let bad = [
            TerminationSpec::MaxMessages { count: 0 },
            TerminationSpec::Timeout { seconds: 0 },
            TerminationSpec::NoOutputFor { seconds: 0 },
            TerminationSpec::OutputPattern {
                pattern: "[".to_string(),
            },
            TerminationSpec::Any { conditions: vec![] },
        ];
        for spec in bad {
            assert!(
                matches!(spec.compile(), Err(CoreError::Validation(_))),
                "{:?} should be rejected",
                spec
            );
        }
    }
}
