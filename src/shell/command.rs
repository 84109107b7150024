//! Shell commands.
//!
//! Each line typed at the prompt is one [`ShellCommand`]: a command word, usually a
//! namespace, then one or more JSON documents and trailing flags. Documents use extended
//! JSON, so `{"_id": {"$oid": "..."}}` works as expected.
//!
//! # Example
//! ```rust
//! use docwire::shell::ShellCommand;
//! use bson::doc;
//!
//! let cmd: ShellCommand = r#"delete app.users {"name": "bob"} one"#.try_into().unwrap();
//! assert!(matches!(cmd, ShellCommand::Delete { ref filter, .. } if filter == &doc! { "name": "bob" }));
//! ```
use bson::{Bson, Document};
use serde_json::Value;
use thiserror::Error;

use crate::bulk::{DeleteOptions, UpdateOptions};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("invalid JSON for '{command}': {reason}")]
    InvalidJson { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    /// `.exit`
    Exit,
    /// `.ping [db]`, against `admin` by default.
    Ping { db: String },
    /// `command <db> <json>`
    Command { db: String, command: Document },
    /// `find <ns> <filter-json> [options-json]`
    Find {
        namespace: String,
        filter: Document,
        options: Option<Document>,
    },
    /// `insert <ns> <json>`
    Insert { namespace: String, document: Document },
    /// `delete <ns> <filter-json> [one]`
    Delete {
        namespace: String,
        filter: Document,
        options: DeleteOptions,
    },
    /// `update <ns> <filter-json> <update-json> [multi] [upsert]`
    Update {
        namespace: String,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    },
}

/// Splits off the next whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

fn required_word<'a>(command: &str, input: &'a str, what: &str) -> Result<(&'a str, &'a str), CommandError> {
    next_word(input).ok_or_else(|| CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: format!("requires a {what}"),
    })
}

/// Parses one JSON document off the front of `input`.
fn next_document<'a>(command: &str, input: &'a str) -> Result<(Document, &'a str), CommandError> {
    let invalid = |reason: String| CommandError::InvalidJson {
        command: command.to_string(),
        reason,
    };

    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Value>();
    let value = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(invalid(e.to_string())),
        None => {
            return Err(CommandError::InvalidCommandArguments {
                command: command.to_string(),
                reason: "requires a JSON document".to_string(),
            });
        }
    };
    let rest = &input[stream.byte_offset()..];

    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok((doc, rest)),
        Ok(other) => Err(invalid(format!(
            "expected an object, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Collects trailing flag words, rejecting any not in `allowed`.
fn flags<'a>(command: &str, input: &'a str, allowed: &[&str]) -> Result<Vec<&'a str>, CommandError> {
    input
        .split_whitespace()
        .map(|flag| {
            if allowed.contains(&flag) {
                Ok(flag)
            } else {
                Err(CommandError::InvalidCommandArguments {
                    command: command.to_string(),
                    reason: format!("unknown flag '{flag}'"),
                })
            }
        })
        .collect()
}

impl TryFrom<&str> for ShellCommand {
    type Error = CommandError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let Some((word, rest)) = next_word(line) else {
            return Err(CommandError::Empty);
        };

        match word {
            ".exit" => Ok(ShellCommand::Exit),
            ".ping" => {
                let db = next_word(rest).map_or("admin", |(db, _)| db);
                Ok(ShellCommand::Ping { db: db.to_string() })
            }
            "command" => {
                let (db, rest) = required_word(word, rest, "database")?;
                let (command, rest) = next_document(word, rest)?;
                flags(word, rest, &[])?;
                Ok(ShellCommand::Command {
                    db: db.to_string(),
                    command,
                })
            }
            "find" => {
                let (namespace, rest) = required_word(word, rest, "namespace")?;
                let (filter, rest) = next_document(word, rest)?;
                let options = if rest.trim().is_empty() {
                    None
                } else {
                    let (options, rest) = next_document(word, rest)?;
                    flags(word, rest, &[])?;
                    Some(options)
                };
                Ok(ShellCommand::Find {
                    namespace: namespace.to_string(),
                    filter,
                    options,
                })
            }
            "insert" => {
                let (namespace, rest) = required_word(word, rest, "namespace")?;
                let (document, rest) = next_document(word, rest)?;
                flags(word, rest, &[])?;
                Ok(ShellCommand::Insert {
                    namespace: namespace.to_string(),
                    document,
                })
            }
            "delete" => {
                let (namespace, rest) = required_word(word, rest, "namespace")?;
                let (filter, rest) = next_document(word, rest)?;
                let flags = flags(word, rest, &["one"])?;
                Ok(ShellCommand::Delete {
                    namespace: namespace.to_string(),
                    filter,
                    options: DeleteOptions {
                        limit_one: flags.contains(&"one"),
                    },
                })
            }
            "update" => {
                let (namespace, rest) = required_word(word, rest, "namespace")?;
                let (filter, rest) = next_document(word, rest)?;
                let (update, rest) = next_document(word, rest)?;
                let flags = flags(word, rest, &["multi", "upsert"])?;
                Ok(ShellCommand::Update {
                    namespace: namespace.to_string(),
                    filter,
                    update,
                    options: UpdateOptions {
                        multi: flags.contains(&"multi"),
                        upsert: flags.contains(&"upsert"),
                    },
                })
            }
            s => Err(CommandError::UnrecognizedCommand(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};

    use super::*;

    fn parse(line: &str) -> ShellCommand {
        line.try_into().unwrap()
    }

    #[test]
    fn parses_dot_commands() {
        assert_eq!(parse(".exit"), ShellCommand::Exit);
        assert_eq!(
            parse(".ping"),
            ShellCommand::Ping {
                db: "admin".to_string()
            }
        );
        assert_eq!(
            parse("  .ping app  "),
            ShellCommand::Ping {
                db: "app".to_string()
            }
        );
    }

    #[test]
    fn parses_documents_with_spaces() {
        assert_eq!(
            parse(r#"find app.users { "age": { "$gt": 21 } } {"limit": 5}"#),
            ShellCommand::Find {
                namespace: "app.users".to_string(),
                filter: doc! { "age": { "$gt": 21 } },
                options: Some(doc! { "limit": 5 }),
            }
        );
        assert_eq!(
            parse(r#"command admin {"ping": 1}"#),
            ShellCommand::Command {
                db: "admin".to_string(),
                command: doc! { "ping": 1 },
            }
        );
    }

    #[test]
    fn parses_write_flags() {
        assert_eq!(
            parse(r#"update app.users {"a": 1} {"$set": {"b": 2}} upsert multi"#),
            ShellCommand::Update {
                namespace: "app.users".to_string(),
                filter: doc! { "a": 1 },
                update: doc! { "$set": { "b": 2 } },
                options: UpdateOptions {
                    multi: true,
                    upsert: true,
                },
            }
        );
        assert_eq!(
            parse(r#"delete app.users {}"#),
            ShellCommand::Delete {
                namespace: "app.users".to_string(),
                filter: doc! {},
                options: DeleteOptions { limit_one: false },
            }
        );
    }

    #[test]
    fn reads_extended_json() {
        let id = ObjectId::new();
        let line = format!(r#"insert app.users {{"_id": {{"$oid": "{id}"}}}}"#);
        assert_eq!(
            parse(&line),
            ShellCommand::Insert {
                namespace: "app.users".to_string(),
                document: doc! { "_id": id },
            }
        );
    }

    #[test]
    fn reports_bad_input() {
        let inputs = vec![
            ("", CommandError::Empty),
            ("drop app.users", CommandError::UnrecognizedCommand("drop".into())),
            (
                "insert",
                CommandError::InvalidCommandArguments {
                    command: "insert".into(),
                    reason: "requires a namespace".into(),
                },
            ),
            (
                "insert app.users",
                CommandError::InvalidCommandArguments {
                    command: "insert".into(),
                    reason: "requires a JSON document".into(),
                },
            ),
            (
                r#"delete app.users {} all"#,
                CommandError::InvalidCommandArguments {
                    command: "delete".into(),
                    reason: "unknown flag 'all'".into(),
                },
            ),
        ];

        for (input, expected) in inputs {
            let res: Result<ShellCommand, _> = input.try_into();
            assert_eq!(res.unwrap_err(), expected, "{input}");
        }
    }

    #[test]
    #[should_panic(expected = "expected an object")]
    fn rejects_non_object_documents() {
        parse("insert app.users [1, 2]");
    }
}
