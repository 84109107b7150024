//! Boundary between the execution layer and the driver that talks to the server.
//!
//! The execution layer only sees a [`Client`] and the [`ServerCursor`]s it hands out.
//! [`WireClient`](crate::protocol::WireClient) is the built-in implementation; tests and
//! embedders can supply their own.
use std::fmt;

use bson::{Bson, Document, doc};

use crate::{
    bulk::BulkWrite,
    error::LowLevelError,
    namespace::Namespace,
    options::{ReadPreference, ServerId, WriteConcern},
    query::{QueryFlags, QuerySpec},
};

/// Server-assigned cursor id; 0 means the server holds no cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CursorId(pub i64);

impl CursorId {
    pub fn is_live(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A server-side iteration handle. Dropping it releases the server cursor, best effort.
pub trait ServerCursor {
    /// `Ok(None)` once the cursor is exhausted; `Err` only when fetching failed.
    fn next_document(&mut self) -> Result<Option<Document>, LowLevelError>;

    fn id(&self) -> CursorId;

    fn server_id(&self) -> ServerId;

    /// Reinterprets a command reply as a command cursor: stop yielding the reply itself
    /// and continue with later batches of cursor `id` on `namespace`.
    fn adopt_command_cursor(&mut self, id: CursorId, namespace: &Namespace);

    fn snapshot(&self) -> CursorSnapshot;
}

/// Introspection view of a cursor's position and the request that opened it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CursorSnapshot {
    pub stamp: u32,
    pub is_command: bool,
    pub sent: bool,
    pub done: bool,
    pub failed: bool,
    pub end_of_event: bool,
    pub in_exhaust: bool,
    pub has_fields: bool,
    pub query: Document,
    pub fields: Document,
    pub read_preference: Option<ReadPreference>,
    pub flags: QueryFlags,
    pub skip: i32,
    pub limit: i32,
    pub count: u64,
    pub batch_size: i32,
    pub ns: String,
    pub current_doc: Option<Document>,
}

impl CursorSnapshot {
    pub fn to_document(&self) -> Document {
        doc! {
            "stamp": i64::from(self.stamp),
            "is_command": self.is_command,
            "sent": self.sent,
            "done": self.done,
            "failed": self.failed,
            "end_of_event": self.end_of_event,
            "in_exhaust": self.in_exhaust,
            "has_fields": self.has_fields,
            "query": self.query.clone(),
            "fields": self.fields.clone(),
            "read_preference": self
                .read_preference
                .as_ref()
                .map_or(Bson::Null, |rp| Bson::Document(rp.debug_document())),
            "flags": i64::from(self.flags.bits()),
            "skip": self.skip,
            "limit": self.limit,
            "count": self.count as i64,
            "batch_size": self.batch_size,
            "ns": self.ns.as_str(),
            "current_doc": self.current_doc.clone().map_or(Bson::Null, Bson::Document),
        }
    }
}

/// A batch bound to everything needed to send it.
#[derive(Debug, Clone, Copy)]
pub struct BoundBulk<'a> {
    pub bulk: &'a BulkWrite,
    pub namespace: &'a Namespace,
    pub write_concern: &'a WriteConcern,
    pub server_hint: Option<ServerId>,
}

/// Transient outcome of a batch, as reported by the driver. Documents use the server's
/// field names: `upserted` entries are `{index, _id}`, `write_errors` entries are
/// `{index, code, errmsg, errInfo?}` and `write_concern_error` is `{code, errmsg, errInfo?}`
/// (empty when the concern was satisfied).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub success: bool,
    /// Why the batch could not be completed, independent of document-level errors.
    pub error: Option<LowLevelError>,
    pub server_id: Option<ServerId>,
    pub n_inserted: i64,
    pub n_matched: i64,
    /// `None` when the server did not report modification counts.
    pub n_modified: Option<i64>,
    pub n_removed: i64,
    pub n_upserted: i64,
    pub upserted: Vec<Document>,
    pub write_errors: Vec<Document>,
    pub write_concern_error: Document,
}

pub trait Client {
    /// Write concern applied when an operation does not supply one.
    fn write_concern(&self) -> &WriteConcern;

    fn execute_bulk(&self, bulk: &BoundBulk<'_>) -> BulkOutcome;

    fn find(
        &self,
        namespace: &Namespace,
        query: &QuerySpec,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Box<dyn ServerCursor>, LowLevelError>;

    /// Runs `command` against database `db`. The returned cursor yields the reply.
    fn command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Box<dyn ServerCursor>, LowLevelError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_projection_has_position_flags() {
        let snapshot = CursorSnapshot {
            sent: true,
            end_of_event: true,
            ns: "app.users".into(),
            read_preference: Some(ReadPreference::default()),
            ..Default::default()
        };
        let doc = snapshot.to_document();

        assert_eq!(doc.get_bool("sent").unwrap(), true);
        assert_eq!(doc.get_bool("done").unwrap(), false);
        assert_eq!(doc.get_str("ns").unwrap(), "app.users");
        assert_eq!(doc.get_document("read_preference").unwrap().get_i32("mode").unwrap(), 1);
        assert_eq!(doc.get("current_doc"), Some(&Bson::Null));
    }

    #[test]
    fn cursor_id_liveness() {
        assert!(!CursorId(0).is_live());
        assert!(CursorId(42).is_live());
        assert_eq!(CursorId(42).to_string(), "42");
    }
}
