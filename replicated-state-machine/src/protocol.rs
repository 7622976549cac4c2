//! Console command parsing for the interactive shell.
//!
//! This is separate from [`crate::command::Command`] because:
//! - `ConsoleCommand` is the shell interface, including local meta-commands
//!   (GET, STATUS, SYNC, EXIT) that never go through the queue
//! - `Command` is only what the apply worker understands
//!
//! Anything that is not a meta-command is forwarded to the queue as-is, so a
//! typo like `FROB x` is rejected (and logged) by the worker, not the shell.

use anyhow::{Result, anyhow};

use crate::command::Command;

/// Commands that can be entered at the prompt.
#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    /// A line for the apply queue.
    Submit(String),
    Get { key: String },
    Status,
    Sync,
    Exit,
    Help,
}

impl ConsoleCommand {
    /// Parses a line of user input.
    ///
    /// # Syntax
    /// Meta-commands are case-insensitive and support one-letter aliases:
    /// - `PUT <key> <value>` (alias: `p`) - queue a put
    /// - `DELETE <key>` (alias: `d`) - queue a delete
    /// - `GET <key>` (alias: `g`) - read the current value
    /// - `STATUS` (alias: `s`) - show apply index and store contents
    /// - `SYNC` (alias: `y`) - wait until everything queued so far is applied
    /// - `HELP` (alias: `h`) - print command reference
    /// - `EXIT` (alias: `e`) - shut down
    ///
    /// PUT and DELETE are forwarded with the action word upper-cased and the
    /// remaining tokens untouched; the worker validates the arguments.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();

        let cmd = parts[0].to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "P" => Command::PUT,
            "D" => Command::DELETE,
            "G" => "GET",
            "S" => "STATUS",
            "Y" => "SYNC",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized_cmd, parts.len()) {
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("STATUS", 1) => Ok(ConsoleCommand::Status),
            ("SYNC", 1) => Ok(ConsoleCommand::Sync),
            ("GET", 2) => Ok(ConsoleCommand::Get {
                key: parts[1].to_string(),
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("EXIT" | "HELP" | "STATUS" | "SYNC", _) => {
                Err(anyhow!("{normalized_cmd} takes no arguments"))
            }
            (Command::PUT | Command::DELETE, _) => {
                let mut forwarded = normalized_cmd.to_string();
                for part in &parts[1..] {
                    forwarded.push(' ');
                    forwarded.push_str(part);
                }
                Ok(ConsoleCommand::Submit(forwarded))
            }
            _ => Ok(ConsoleCommand::Submit(trimmed.to_string())),
        }
    }

    pub const HELP: &'static str = "\
Commands:
  PUT/p <key> <value>   queue a put
  DELETE/d <key>        queue a delete
  GET/g <key>           read the applied value
  STATUS/s              apply index, key count, store contents
  SYNC/y                wait for queued commands to apply
  HELP/h                this text
  EXIT/e                shut down";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(line: &str) -> ConsoleCommand {
        ConsoleCommand::Submit(line.to_string())
    }

    #[test]
    fn test_case_insensitive_meta_commands() {
        assert!(matches!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("help"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("STATUS"), Ok(ConsoleCommand::Status)));
        assert!(matches!(ConsoleCommand::parse("sync"), Ok(ConsoleCommand::Sync)));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(ConsoleCommand::parse("e"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("H"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("s"), Ok(ConsoleCommand::Status)));
        assert!(matches!(ConsoleCommand::parse("y"), Ok(ConsoleCommand::Sync)));
        assert!(matches!(
            ConsoleCommand::parse("g foo"),
            Ok(ConsoleCommand::Get { key }) if key == "foo"
        ));
        assert_eq!(ConsoleCommand::parse("p k v").unwrap(), submit("PUT k v"));
        assert_eq!(ConsoleCommand::parse("d k").unwrap(), submit("DELETE k"));
    }

    #[test]
    fn test_put_and_delete_are_normalized_and_forwarded() {
        assert_eq!(ConsoleCommand::parse("put Key Val").unwrap(), submit("PUT Key Val"));
        assert_eq!(ConsoleCommand::parse("  Delete  k ").unwrap(), submit("DELETE k"));
        // Argument errors are left for the worker to reject.
        assert_eq!(ConsoleCommand::parse("PUT key1").unwrap(), submit("PUT key1"));
    }

    #[test]
    fn test_unknown_words_are_forwarded_verbatim() {
        assert_eq!(ConsoleCommand::parse("FROB x").unwrap(), submit("FROB x"));
    }

    #[test]
    fn test_invalid_meta_commands() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("   ").is_err());
        assert!(ConsoleCommand::parse("GET").is_err());
        assert!(ConsoleCommand::parse("GET a b").is_err());
        assert!(ConsoleCommand::parse("STATUS now").is_err());
    }
}
