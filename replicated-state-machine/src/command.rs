//! Commands that flow through the apply queue.
//!
//! A command arrives as a single text line, `ACTION KEY [VALUE]`, and is only
//! turned into a [`Command`] when the apply worker reaches it. Parsing is
//! strict: `PUT` takes exactly one value token, `DELETE` takes none, and the
//! action word is case-sensitive.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed state-machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Put { key: String, value: String },
    Delete { key: String },
}

/// Why a command line could not be turned into a [`Command`].
///
/// Every variant is recoverable: the apply worker logs it and moves on to the
/// next queued line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownAction(String),

    #[error("malformed {action} command: {reason}")]
    Malformed {
        action: &'static str,
        reason: &'static str,
    },
}

impl Command {
    pub const PUT: &'static str = "PUT";
    pub const DELETE: &'static str = "DELETE";

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete { key: key.into() }
    }

    /// Parses a raw command line.
    ///
    /// Tokens are separated by runs of whitespace, so keys and values cannot
    /// contain spaces. Trailing tokens beyond what the action takes are an
    /// error rather than being silently ignored.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let action = parts.next().ok_or(CommandError::Empty)?;

        match action {
            Self::PUT => {
                let key = parts.next().ok_or(CommandError::Malformed {
                    action: Self::PUT,
                    reason: "missing key",
                })?;
                let value = parts.next().ok_or(CommandError::Malformed {
                    action: Self::PUT,
                    reason: "missing value",
                })?;
                if parts.next().is_some() {
                    return Err(CommandError::Malformed {
                        action: Self::PUT,
                        reason: "expected exactly: PUT <key> <value>",
                    });
                }
                Ok(Command::put(key, value))
            }
            Self::DELETE => {
                let key = parts.next().ok_or(CommandError::Malformed {
                    action: Self::DELETE,
                    reason: "missing key",
                })?;
                if parts.next().is_some() {
                    return Err(CommandError::Malformed {
                        action: Self::DELETE,
                        reason: "expected exactly: DELETE <key>",
                    });
                }
                Ok(Command::delete(key))
            }
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Put { key, .. } | Command::Delete { key } => key,
        }
    }
}

/// Renders the canonical text line, which parses back to the same command.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Put { key, value } => write!(f, "{} {key} {value}", Self::PUT),
            Command::Delete { key } => write!(f, "{} {key}", Self::DELETE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_and_delete() {
        assert_eq!(
            Command::parse("PUT key1 value1"),
            Ok(Command::put("key1", "value1"))
        );
        assert_eq!(Command::parse("DELETE key1"), Ok(Command::delete("key1")));
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(Command::parse("  PUT a   1 \n"), Ok(Command::put("a", "1")));
        assert_eq!(Command::parse("\tDELETE a\r\n"), Ok(Command::delete("a")));
    }

    #[test]
    fn rejects_missing_tokens() {
        assert!(matches!(
            Command::parse("PUT key1"),
            Err(CommandError::Malformed { action: "PUT", .. })
        ));
        assert!(matches!(
            Command::parse("PUT"),
            Err(CommandError::Malformed { action: "PUT", .. })
        ));
        assert!(matches!(
            Command::parse("DELETE"),
            Err(CommandError::Malformed { action: "DELETE", .. })
        ));
    }

    #[test]
    fn rejects_extra_tokens() {
        assert!(Command::parse("PUT k v extra").is_err());
        assert!(Command::parse("DELETE k v").is_err());
    }

    #[test]
    fn rejects_unknown_actions() {
        assert_eq!(
            Command::parse("FROB x"),
            Err(CommandError::UnknownAction("FROB".to_string()))
        );
        // Action words are case-sensitive on the apply path.
        assert_eq!(
            Command::parse("put a 1"),
            Err(CommandError::UnknownAction("put".to_string()))
        );
    }

    #[test]
    fn rejects_blank_lines() {
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
    }

    #[test]
    fn display_is_the_canonical_line() {
        let put = Command::put("a", "1");
        assert_eq!(put.to_string(), "PUT a 1");
        assert_eq!(Command::parse(&put.to_string()), Ok(put));
        assert_eq!(Command::delete("a").to_string(), "DELETE a");
    }

    #[test]
    fn serializes_with_op_tag() {
        let json = serde_json::to_string(&Command::delete("k")).unwrap();
        assert_eq!(json, r#"{"op":"delete","key":"k"}"#);
    }
}
