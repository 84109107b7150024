//! Execution layer.
//!
//! Turns a write batch, a query, or a command into a call on a [`Client`] and decides what
//! the caller sees: nothing, a [`WriteResult`], a [`QueryResult`], or exactly one
//! [`Error`]. Each execution moves `Idle -> Dispatched -> Succeeded | Failed`, and a
//! success becomes `ResultMaterialized` when the caller keeps the value. Nothing is
//! retried here.
use std::fmt;

use bson::{Bson, Document};
use log::{trace, warn};

use crate::{
    Error,
    bulk::{BulkWrite, DeleteOptions, UpdateOptions},
    client::{BoundBulk, Client, CursorId},
    error::{ErrorDomain, LowLevelError},
    namespace::Namespace,
    options::{ReadPreference, ServerId, WriteConcern},
    query::QuerySpec,
    result::QueryResult,
    write_result::WriteResult,
};

/// Whether the caller wants the operation's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    Discard,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Idle,
    Dispatched,
    Succeeded,
    Failed,
    ResultMaterialized,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Dispatched => "dispatched",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::ResultMaterialized => "result materialized",
        };
        write!(f, "{name}")
    }
}

struct Execution {
    operation: &'static str,
    state: ExecutionState,
    debug: bool,
}

impl Execution {
    fn new(operation: &'static str, debug: bool) -> Self {
        Self {
            operation,
            state: ExecutionState::Idle,
            debug,
        }
    }

    fn transition(&mut self, next: ExecutionState) {
        if self.debug {
            trace!("{}: {} -> {next}", self.operation, self.state);
        }
        self.state = next;
    }

    fn fail(&mut self, error: impl Into<Error>) -> Error {
        self.transition(ExecutionState::Failed);
        error.into()
    }
}

/// Runs operations against one client.
///
/// # Example
/// ```rust,no_run
/// use docwire::{Manager, execute::ResultMode};
/// use bson::doc;
///
/// let manager = Manager::new("mongodb://localhost:27017", None).unwrap();
/// let executor = manager.executor();
///
/// executor
///     .execute_insert("app.users", doc! { "name": "ada" }, None, ResultMode::Discard)
///     .unwrap();
/// ```
#[derive(Clone, Copy)]
pub struct Executor<'c> {
    client: &'c dyn Client,
    debug: bool,
}

impl<'c> Executor<'c> {
    pub fn new(client: &'c dyn Client) -> Self {
        Self {
            client,
            debug: false,
        }
    }

    /// Traces every state transition.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sends `bulk` to `namespace`. Without an explicit `write_concern` the client's
    /// default is used, and recorded in the result either way.
    ///
    /// A successful write whose result is discarded returns `Ok(None)` without building a
    /// [`WriteResult`]. A failure with document-level or write-concern errors becomes
    /// [`Error::WriteFailed`] carrying the result; any other failure is classified from
    /// the driver's low-level error.
    pub fn execute_write(
        &self,
        namespace: &str,
        bulk: &BulkWrite,
        write_concern: Option<&WriteConcern>,
        server_id: Option<ServerId>,
        mode: ResultMode,
    ) -> Result<Option<WriteResult>, Error> {
        let namespace = Namespace::parse(namespace)?;
        if bulk.is_empty() {
            return Err(Error::invalid_argument("Cannot do an empty bulk write"));
        }

        let mut execution = Execution::new("write", self.debug);
        let write_concern = write_concern.unwrap_or_else(|| self.client.write_concern());
        let bound = BoundBulk {
            bulk,
            namespace: &namespace,
            write_concern,
            server_hint: server_id,
        };

        execution.transition(ExecutionState::Dispatched);
        let outcome = self.client.execute_bulk(&bound);

        if outcome.success {
            execution.transition(ExecutionState::Succeeded);
            if mode == ResultMode::Discard {
                return Ok(None);
            }
        }

        let result = WriteResult::from_outcome(&outcome, write_concern);
        let error = outcome.error;

        if execution.state == ExecutionState::Succeeded {
            execution.transition(ExecutionState::ResultMaterialized);
            return Ok(Some(result));
        }

        if !result.has_write_errors() && !result.has_write_concern_error() {
            let error = error.unwrap_or_else(|| {
                LowLevelError::new(ErrorDomain::Client, 0, "Unknown error during bulk write")
            });
            return Err(execution.fail(error));
        }

        Err(execution.fail(Error::WriteFailed(Box::new(result))))
    }

    /// Runs a query and fetches its first document. An empty result is not an error; a
    /// failed fetch is, and the cursor is released before it is reported.
    pub fn execute_query(
        &self,
        namespace: &str,
        query: &QuerySpec,
        read_preference: Option<&ReadPreference>,
        server_id: Option<ServerId>,
        mode: ResultMode,
    ) -> Result<Option<QueryResult>, Error> {
        let namespace = Namespace::parse(namespace)?;
        let mut execution = Execution::new("query", self.debug);

        execution.transition(ExecutionState::Dispatched);
        let mut cursor = self
            .client
            .find(&namespace, query, read_preference, server_id)
            .map_err(|e| execution.fail(Error::cursor_creation(&e)))?;

        let first = match cursor.next_document() {
            Ok(first) => first,
            Err(e) => {
                drop(cursor);
                return Err(execution.fail(e));
            }
        };
        execution.transition(ExecutionState::Succeeded);

        if mode == ResultMode::Discard {
            return Ok(None);
        }

        execution.transition(ExecutionState::ResultMaterialized);
        Ok(Some(QueryResult::from_cursor(cursor, first, Some(namespace))))
    }

    /// Runs a command against database `db`. A reply carrying
    /// `cursor: { id, ns, firstBatch: [..] }` becomes a command-cursor result; any other
    /// reply is the single document of the result.
    pub fn execute_command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_id: Option<ServerId>,
        mode: ResultMode,
    ) -> Result<Option<QueryResult>, Error> {
        let mut execution = Execution::new("command", self.debug);

        execution.transition(ExecutionState::Dispatched);
        let mut cursor = self
            .client
            .command(db, command, read_preference, server_id)
            .map_err(|e| execution.fail(Error::cursor_creation(&e)))?;

        let reply = match cursor.next_document() {
            Ok(reply) => reply,
            Err(e) => {
                drop(cursor);
                return Err(execution.fail(e));
            }
        };
        execution.transition(ExecutionState::Succeeded);

        if mode == ResultMode::Discard {
            return Ok(None);
        }

        execution.transition(ExecutionState::ResultMaterialized);
        let result = match reply
            .as_ref()
            .and_then(|reply| command_cursor(db, command, reply))
        {
            Some((id, namespace, first_batch)) => {
                cursor.adopt_command_cursor(id, &namespace);
                QueryResult::command_cursor(cursor, first_batch, namespace)
            }
            None => QueryResult::from_cursor(cursor, reply, None),
        };
        Ok(Some(result))
    }

    /// Inserts one document. Batch failures are reported as the single write or
    /// write-concern error they contain.
    pub fn execute_insert(
        &self,
        namespace: &str,
        document: Document,
        write_concern: Option<&WriteConcern>,
        mode: ResultMode,
    ) -> Result<Option<WriteResult>, Error> {
        let mut bulk = BulkWrite::new(true);
        bulk.insert(document);
        self.execute_single(namespace, &bulk, write_concern, mode)
    }

    pub fn execute_update(
        &self,
        namespace: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        write_concern: Option<&WriteConcern>,
        mode: ResultMode,
    ) -> Result<Option<WriteResult>, Error> {
        let mut bulk = BulkWrite::new(true);
        bulk.update(filter, update, options)?;
        self.execute_single(namespace, &bulk, write_concern, mode)
    }

    pub fn execute_delete(
        &self,
        namespace: &str,
        filter: Document,
        options: DeleteOptions,
        write_concern: Option<&WriteConcern>,
        mode: ResultMode,
    ) -> Result<Option<WriteResult>, Error> {
        let mut bulk = BulkWrite::new(true);
        bulk.delete(filter, options);
        self.execute_single(namespace, &bulk, write_concern, mode)
    }

    fn execute_single(
        &self,
        namespace: &str,
        bulk: &BulkWrite,
        write_concern: Option<&WriteConcern>,
        mode: ResultMode,
    ) -> Result<Option<WriteResult>, Error> {
        match self.execute_write(namespace, bulk, write_concern, None, mode) {
            Err(Error::WriteFailed(result)) => Err(unwrap_write_failure(*result)),
            other => other,
        }
    }
}

/// Re-surfaces a batch failure as the error of its single operation: the first write
/// error, with any write-concern error chained as its source, or the write-concern error
/// alone. Both carry the write result.
pub fn unwrap_write_failure(result: WriteResult) -> Error {
    let concern = result
        .write_concern_error()
        .map(|wce| Error::WriteConcernFailed {
            code: wce.code,
            message: wce.message,
            write_result: None,
        });

    let error = match (result.first_write_error(), concern) {
        (Some(first), concern) => Error::WriteErrorSingle {
            code: first.code,
            message: first.message,
            write_result: None,
            concern: concern.map(Box::new),
        },
        (None, Some(concern)) => concern,
        (None, None) => return Error::WriteFailed(Box::new(result)),
    };

    error.with_write_result(result)
}

/// Namespace a command runs in: `db` and the collection the command names, or `$cmd`
/// when it names none.
fn command_namespace(db: &str, command: &Document) -> Namespace {
    let collection = match command.iter().next() {
        Some((_, Bson::String(collection))) => collection.as_str(),
        _ => "$cmd",
    };
    Namespace::new(db, collection)
}

/// `(id, namespace, firstBatch)` when `reply` describes a command cursor. A missing or
/// unparsable `ns` falls back to the namespace of `command`.
fn command_cursor(
    db: &str,
    command: &Document,
    reply: &Document,
) -> Option<(CursorId, Namespace, Vec<Document>)> {
    let cursor = reply.get_document("cursor").ok()?;
    let first_batch = cursor.get_array("firstBatch").ok()?;

    let id = match cursor.get("id")? {
        Bson::Int64(id) => *id,
        Bson::Int32(id) => i64::from(*id),
        Bson::Double(id) if id.fract() == 0.0 && id.abs() < i64::MAX as f64 => *id as i64,
        _ => return None,
    };

    let namespace = match cursor.get_str("ns") {
        Ok(ns) => Namespace::parse(ns).unwrap_or_else(|e| {
            warn!("cursor namespace '{ns}': {e}, using the command's namespace");
            command_namespace(db, command)
        }),
        Err(_) => command_namespace(db, command),
    };

    let documents = first_batch
        .iter()
        .filter_map(|entry| match entry {
            Bson::Document(doc) => Some(doc.clone()),
            other => {
                warn!(
                    "skipping {:?} entry in firstBatch of '{namespace}'",
                    other.element_type()
                );
                None
            }
        })
        .collect();

    Some((CursorId(id), namespace, documents))
}
