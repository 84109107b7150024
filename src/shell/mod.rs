//! Interactive shell.
//!
//! The utilities in this module read [`ShellCommand`]s from a prompt and run them against
//! a [`Manager`], printing documents as relaxed extended JSON.
mod command;

use std::{
    io::{self, BufRead, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use bson::{Bson, Document, doc};
use thiserror::Error;

use crate::{Manager, query::QuerySpec, result::QueryResult, write_result::WriteResult};

pub use command::{CommandError, ShellCommand};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("{0}")]
    Driver(#[from] crate::Error),
    #[error("shell IO error: {0}")]
    Io(#[from] io::Error),
}

/// Prompts for one command. `Ok(None)` means the input has ended.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Option<ShellCommand>, ShellError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(None);
    }

    Ok(Some(s.trim_end().try_into()?))
}

/// Whether the shell should keep prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn print_document<W: Write>(writer: &mut W, document: Document) -> io::Result<()> {
    writeln!(writer, "{}", Bson::Document(document).into_relaxed_extjson())
}

/// Prints every document of `result`. Setting `interrupted` stops after the current
/// document; the result, and with it the server cursor, is released either way.
fn print_result<W: Write>(
    writer: &mut W,
    mut result: QueryResult,
    interrupted: &AtomicBool,
) -> Result<(), ShellError> {
    for document in result.iter() {
        if interrupted.swap(false, Ordering::SeqCst) {
            writeln!(writer, "interrupted")?;
            break;
        }
        print_document(writer, document?)?;
    }
    Ok(())
}

fn print_write_result<W: Write>(writer: &mut W, result: &WriteResult) -> io::Result<()> {
    let mut summary = doc! {
        "acknowledged": result.is_acknowledged(),
        "nInserted": result.inserted_count(),
        "nMatched": result.matched_count(),
    };
    if let Some(modified) = result.modified_count() {
        summary.insert("nModified", modified);
    }
    summary.insert("nRemoved", result.deleted_count());
    summary.insert("nUpserted", result.upserted_count());
    print_document(writer, summary)
}

/// Runs `command`, writing its output to `writer`.
pub fn run<W: Write>(
    manager: &Manager,
    command: ShellCommand,
    writer: &mut W,
    interrupted: &AtomicBool,
) -> Result<Flow, ShellError> {
    interrupted.store(false, Ordering::SeqCst);

    match command {
        ShellCommand::Exit => return Ok(Flow::Exit),
        ShellCommand::Ping { db } => {
            let result = manager.execute_command(&db, &doc! { "ping": 1 })?;
            print_result(writer, result, interrupted)?;
        }
        ShellCommand::Command { db, command } => {
            let result = manager.execute_command(&db, &command)?;
            print_result(writer, result, interrupted)?;
        }
        ShellCommand::Find {
            namespace,
            filter,
            options,
        } => {
            let spec = QuerySpec::new(filter, options.as_ref())?;
            let result = manager.execute_query(&namespace, &spec, None)?;
            print_result(writer, result, interrupted)?;
        }
        ShellCommand::Insert {
            namespace,
            document,
        } => {
            let result = manager.execute_insert(&namespace, document, None)?;
            print_write_result(writer, &result)?;
        }
        ShellCommand::Delete {
            namespace,
            filter,
            options,
        } => {
            let result = manager.execute_delete(&namespace, filter, options, None)?;
            print_write_result(writer, &result)?;
        }
        ShellCommand::Update {
            namespace,
            filter,
            update,
            options,
        } => {
            let result = manager.execute_update(&namespace, filter, update, options, None)?;
            print_write_result(writer, &result)?;
        }
    }

    Ok(Flow::Continue)
}
