//! Bulk-write result aggregation.
//!
//! A [`WriteResult`] is built once from a driver's transient [`BulkOutcome`]. Counts and
//! the `upserted`, `writeErrors` and `writeConcernError` documents are cloned out, so the
//! result stays valid after the outcome is gone.
use bson::{Bson, Document, doc};

use crate::{
    client::BulkOutcome,
    options::{ServerId, WriteConcern},
};

#[cfg(test)]
thread_local! {
    static AGGREGATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Number of results built on this thread.
#[cfg(test)]
pub(crate) fn aggregations() -> usize {
    AGGREGATIONS.with(|c| c.get())
}

/// A document-level failure inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the failed operation in the batch.
    pub index: i32,
    pub code: i32,
    pub message: String,
    pub info: Option<Document>,
}

impl WriteError {
    fn from_document(doc: &Document) -> Self {
        Self {
            index: fetch_i32(doc, "index"),
            code: fetch_i32(doc, "code"),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            info: doc.get_document("errInfo").ok().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
    pub info: Option<Document>,
}

impl WriteConcernError {
    fn from_document(doc: &Document) -> Self {
        Self {
            code: fetch_i32(doc, "code"),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            info: doc.get_document("errInfo").ok().cloned(),
        }
    }
}

fn fetch_i32(doc: &Document, key: &str) -> i32 {
    match doc.get(key) {
        Some(Bson::Int32(v)) => *v,
        Some(Bson::Int64(v)) => i32::try_from(*v).unwrap_or(i32::MAX),
        Some(Bson::Double(v)) => *v as i32,
        _ => 0,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    n_inserted: i64,
    n_matched: i64,
    n_modified: Option<i64>,
    n_removed: i64,
    n_upserted: i64,
    upserted: Vec<Document>,
    write_errors: Vec<Document>,
    write_concern_error: Document,
    write_concern: WriteConcern,
    server_id: Option<ServerId>,
}

impl WriteResult {
    /// Copies everything the caller may inspect out of `outcome`. `write_concern` is the
    /// concern the batch actually ran with, whether explicit or inherited.
    pub fn from_outcome(outcome: &BulkOutcome, write_concern: &WriteConcern) -> Self {
        #[cfg(test)]
        AGGREGATIONS.with(|c| c.set(c.get() + 1));

        Self {
            n_inserted: outcome.n_inserted,
            n_matched: outcome.n_matched,
            n_modified: outcome.n_modified,
            n_removed: outcome.n_removed,
            n_upserted: outcome.n_upserted,
            upserted: outcome.upserted.clone(),
            write_errors: outcome.write_errors.clone(),
            write_concern_error: outcome.write_concern_error.clone(),
            write_concern: write_concern.clone(),
            server_id: outcome.server_id,
        }
    }

    pub fn inserted_count(&self) -> i64 {
        self.n_inserted
    }

    pub fn matched_count(&self) -> i64 {
        self.n_matched
    }

    /// `None` when the server did not report it.
    pub fn modified_count(&self) -> Option<i64> {
        self.n_modified
    }

    pub fn deleted_count(&self) -> i64 {
        self.n_removed
    }

    pub fn upserted_count(&self) -> i64 {
        self.n_upserted
    }

    /// `(batch index, _id)` of every upserted document.
    pub fn upserted_ids(&self) -> Vec<(i32, Bson)> {
        self.upserted
            .iter()
            .filter_map(|doc| Some((fetch_i32(doc, "index"), doc.get("_id")?.clone())))
            .collect()
    }

    /// Every document-level failure, in batch order.
    pub fn write_errors(&self) -> Vec<WriteError> {
        self.write_errors
            .iter()
            .map(WriteError::from_document)
            .collect()
    }

    pub fn has_write_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }

    /// The failure that classifies the batch: always the first one reported.
    pub fn first_write_error(&self) -> Option<WriteError> {
        self.write_errors.first().map(WriteError::from_document)
    }

    pub fn write_concern_error(&self) -> Option<WriteConcernError> {
        (!self.write_concern_error.is_empty())
            .then(|| WriteConcernError::from_document(&self.write_concern_error))
    }

    pub fn has_write_concern_error(&self) -> bool {
        !self.write_concern_error.is_empty()
    }

    pub fn write_concern(&self) -> &WriteConcern {
        &self.write_concern
    }

    pub fn server_id(&self) -> Option<ServerId> {
        self.server_id
    }

    pub fn is_acknowledged(&self) -> bool {
        self.write_concern.is_acknowledged()
    }

    pub fn debug_document(&self) -> Document {
        doc! {
            "nInserted": self.n_inserted,
            "nMatched": self.n_matched,
            "nModified": self.n_modified.map_or(Bson::Null, Bson::Int64),
            "nRemoved": self.n_removed,
            "nUpserted": self.n_upserted,
            "upsertedIds": self.upserted.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            "writeErrors": self.write_errors.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            "writeConcernError": self.write_concern_error.clone(),
            "writeConcern": self.write_concern.debug_document(),
        }
    }
}
