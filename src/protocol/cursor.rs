use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use bson::{Bson, Document, doc};
use log::{debug, warn};

use crate::{
    classify::codes,
    client::{CursorId, CursorSnapshot, ServerCursor},
    error::{ErrorDomain, LowLevelError},
    namespace::Namespace,
    options::{ReadPreference, ServerId},
    query::{QueryFlags, QuerySpec},
    transport::StreamPrimitive,
};

use super::{client::lock, connection::Connection};

/// Query modifiers and the `find` command field each one becomes.
const MODIFIER_FIELDS: [(&str, &str); 7] = [
    ("$hint", "hint"),
    ("$comment", "comment"),
    ("$maxTimeMS", "maxTimeMS"),
    ("$max", "max"),
    ("$min", "min"),
    ("$returnKey", "returnKey"),
    ("$showDiskLoc", "showRecordId"),
];

const FLAG_FIELDS: [(QueryFlags, &str); 5] = [
    (QueryFlags::TAILABLE_CURSOR, "tailable"),
    (QueryFlags::AWAIT_DATA, "awaitData"),
    (QueryFlags::NO_CURSOR_TIMEOUT, "noCursorTimeout"),
    (QueryFlags::OPLOG_REPLAY, "oplogReplay"),
    (QueryFlags::PARTIAL, "allowPartialResults"),
];

/// Translates a query into a `find` command against `namespace`.
pub fn find_command(
    namespace: &Namespace,
    spec: &QuerySpec,
    read_preference: Option<&ReadPreference>,
) -> Document {
    let mut command = doc! { "find": namespace.collection.as_str() };
    command.insert(
        "filter",
        spec.filter_document().cloned().unwrap_or_default(),
    );
    if let Some(sort) = spec.sort() {
        command.insert("sort", sort.clone());
    }
    if let Some(projection) = spec.projection() {
        command.insert("projection", projection.clone());
    }

    for (modifier, value) in spec.modifiers() {
        match MODIFIER_FIELDS.iter().find(|(m, _)| m == modifier) {
            Some((_, field)) => {
                command.insert(*field, value.clone());
            }
            None => warn!("ignoring unsupported query modifier '{modifier}'"),
        }
    }

    if spec.skip() > 0 {
        command.insert("skip", i64::from(spec.skip()));
    }
    match spec.limit() {
        0 => {}
        limit if limit < 0 => {
            command.insert("limit", -i64::from(limit));
            command.insert("singleBatch", true);
        }
        limit => {
            command.insert("limit", i64::from(limit));
        }
    }
    if spec.batch_size() > 0 {
        command.insert("batchSize", spec.batch_size());
    }

    for (flag, field) in FLAG_FIELDS {
        if spec.flags().contains(flag) {
            command.insert(field, true);
        }
    }
    if spec.flags().contains(QueryFlags::EXHAUST) {
        warn!("exhaust cursors are not supported, reading '{namespace}' in batches");
    }

    if let Some(rp) = read_preference.filter(|rp| !rp.is_primary()) {
        command.insert("$readPreference", rp.to_document());
    }

    command
}

enum Request {
    Find {
        spec: QuerySpec,
        read_preference: Option<ReadPreference>,
    },
    Command {
        command: Document,
    },
}

/// Cursor over `find` and command replies on a shared connection.
///
/// Nothing is sent until the first document is requested. Later batches are fetched with
/// `getMore`, the query's limit is enforced locally, and a cursor still open on the
/// server is killed when this one is dropped.
pub struct WireCursor<S: StreamPrimitive> {
    connection: Arc<Mutex<Connection<S>>>,
    server_id: ServerId,
    stamp: u32,
    db: String,
    namespace: Option<Namespace>,
    request: Request,
    id: CursorId,
    batch: VecDeque<Document>,
    limit: i32,
    batch_size: i32,
    flags: QueryFlags,
    count: u64,
    sent: bool,
    done: bool,
    failed: bool,
    end_of_event: bool,
    current: Option<Document>,
}

impl<S: StreamPrimitive> WireCursor<S> {
    pub(crate) fn find(
        connection: Arc<Mutex<Connection<S>>>,
        server_id: ServerId,
        stamp: u32,
        namespace: Namespace,
        spec: QuerySpec,
        read_preference: Option<ReadPreference>,
    ) -> Self {
        let mut cursor = Self::new(connection, server_id, stamp, namespace.db.clone());
        cursor.limit = spec.limit();
        cursor.batch_size = spec.batch_size();
        cursor.flags = spec.flags();
        cursor.namespace = Some(namespace);
        cursor.request = Request::Find {
            spec,
            read_preference,
        };
        cursor
    }

    pub(crate) fn command(
        connection: Arc<Mutex<Connection<S>>>,
        server_id: ServerId,
        stamp: u32,
        db: &str,
        command: Document,
    ) -> Self {
        let mut cursor = Self::new(connection, server_id, stamp, db.to_string());
        cursor.request = Request::Command { command };
        cursor
    }

    fn new(connection: Arc<Mutex<Connection<S>>>, server_id: ServerId, stamp: u32, db: String) -> Self {
        Self {
            connection,
            server_id,
            stamp,
            db,
            namespace: None,
            request: Request::Command {
                command: Document::new(),
            },
            id: CursorId(0),
            batch: VecDeque::new(),
            limit: 0,
            batch_size: 0,
            flags: QueryFlags::NONE,
            count: 0,
            sent: false,
            done: false,
            failed: false,
            end_of_event: false,
            current: None,
        }
    }

    fn is_command(&self) -> bool {
        matches!(self.request, Request::Command { .. })
    }

    fn limit_reached(&self) -> bool {
        let limit = u64::from(self.limit.unsigned_abs());
        limit > 0 && self.count >= limit
    }

    fn fail(&mut self, error: LowLevelError) -> LowLevelError {
        self.failed = true;
        self.done = true;
        self.current = None;
        error
    }

    fn send_initial(&mut self) -> Result<(), LowLevelError> {
        self.sent = true;

        match &self.request {
            Request::Command { command } => {
                let reply = lock(&self.connection).command(&self.db, command)?;
                self.batch.push_back(reply);
            }
            Request::Find {
                spec,
                read_preference,
            } => {
                let Some(namespace) = self.namespace.as_ref() else {
                    return Err(invalid_reply("find cursor has no namespace"));
                };
                let command = find_command(namespace, spec, read_preference.as_ref());
                let reply = lock(&self.connection).command(&self.db, &command)?;
                self.load_batch(&reply, "firstBatch")?;
            }
        }
        Ok(())
    }

    fn get_more(&mut self) -> Result<(), LowLevelError> {
        let Some(namespace) = self.namespace.as_ref() else {
            return Err(invalid_reply("cursor has no namespace to continue on"));
        };

        let mut command = doc! {
            "getMore": self.id.0,
            "collection": namespace.collection.as_str(),
        };
        if self.batch_size > 0 {
            command.insert("batchSize", self.batch_size);
        }

        let reply = lock(&self.connection).command(&self.db, &command)?;
        self.load_batch(&reply, "nextBatch")
    }

    fn load_batch(&mut self, reply: &Document, field: &str) -> Result<(), LowLevelError> {
        let cursor = reply
            .get_document("cursor")
            .map_err(|_| invalid_reply("reply has no cursor document"))?;

        self.id = match cursor.get("id") {
            Some(Bson::Int64(id)) => CursorId(*id),
            Some(Bson::Int32(id)) => CursorId(i64::from(*id)),
            _ => return Err(invalid_reply("cursor reply has no id")),
        };

        let batch = cursor
            .get_array(field)
            .map_err(|_| invalid_reply(format!("cursor reply has no {field}")))?;
        for entry in batch {
            match entry {
                Bson::Document(doc) => self.batch.push_back(doc.clone()),
                other => warn!("skipping {:?} entry in {field}", other.element_type()),
            }
        }
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<Document>, LowLevelError> {
        loop {
            if self.limit_reached() {
                self.done = true;
                return Ok(None);
            }

            if let Some(doc) = self.batch.pop_front() {
                self.count += 1;
                return Ok(Some(doc));
            }

            if self.done {
                return Ok(None);
            }

            if !self.sent {
                self.send_initial()?;
                continue;
            }

            if !self.id.is_live() {
                self.done = true;
                return Ok(None);
            }

            self.end_of_event = false;
            self.get_more()?;

            if self.batch.is_empty() && self.flags.contains(QueryFlags::TAILABLE_CURSOR) {
                // tailable cursors stay open; the caller may ask again later
                self.end_of_event = true;
                return Ok(None);
            }
        }
    }

    fn kill(&mut self) {
        let Some(namespace) = self.namespace.as_ref() else {
            return;
        };
        let command = doc! {
            "killCursors": namespace.collection.as_str(),
            "cursors": [self.id.0],
        };

        if let Err(e) = lock(&self.connection).command(&self.db, &command) {
            debug!("failed to kill cursor {} on '{namespace}': {e}", self.id);
        }
        self.id = CursorId(0);
    }
}

fn invalid_reply(message: impl Into<String>) -> LowLevelError {
    LowLevelError::new(ErrorDomain::Cursor, codes::CURSOR_INVALID_CURSOR, message)
}

impl<S: StreamPrimitive> ServerCursor for WireCursor<S> {
    fn next_document(&mut self) -> Result<Option<Document>, LowLevelError> {
        match self.fetch() {
            Ok(doc) => {
                self.current = doc.clone();
                Ok(doc)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn id(&self) -> CursorId {
        self.id
    }

    fn server_id(&self) -> ServerId {
        self.server_id
    }

    fn adopt_command_cursor(&mut self, id: CursorId, namespace: &Namespace) {
        self.batch.clear();
        self.id = id;
        self.db = namespace.db.clone();
        self.namespace = Some(namespace.clone());
        self.limit = 0;
        self.sent = true;
        self.done = false;
    }

    fn snapshot(&self) -> CursorSnapshot {
        let (query, fields, read_preference) = match &self.request {
            Request::Find {
                spec,
                read_preference,
            } => (
                spec.query().clone(),
                spec.projection().cloned(),
                read_preference.clone(),
            ),
            Request::Command { command } => (command.clone(), None, None),
        };

        CursorSnapshot {
            stamp: self.stamp,
            is_command: self.is_command(),
            sent: self.sent,
            done: self.done,
            failed: self.failed,
            end_of_event: self.end_of_event,
            in_exhaust: false,
            has_fields: fields.is_some(),
            query,
            fields: fields.unwrap_or_default(),
            read_preference,
            flags: self.flags,
            skip: match &self.request {
                Request::Find { spec, .. } => spec.skip(),
                Request::Command { .. } => 0,
            },
            limit: self.limit,
            count: self.count,
            batch_size: self.batch_size,
            ns: self
                .namespace
                .as_ref()
                .map_or_else(|| self.db.clone(), Namespace::to_string),
            current_doc: self.current.clone(),
        }
    }
}

impl<S: StreamPrimitive> Drop for WireCursor<S> {
    fn drop(&mut self) {
        if self.id.is_live() && !self.failed {
            self.kill();
        }
    }
}
