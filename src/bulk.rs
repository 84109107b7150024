//! Batches of insert, update and delete operations.
use bson::{Bson, Document, oid::ObjectId};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteOptions {
    /// Remove at most one matching document.
    pub limit_one: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    Insert {
        document: Document,
    },
    Update {
        filter: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    },
    Delete {
        filter: Document,
        limit_one: bool,
    },
}

impl WriteModel {
    pub fn kind(&self) -> WriteKind {
        match self {
            WriteModel::Insert { .. } => WriteKind::Insert,
            WriteModel::Update { .. } => WriteKind::Update,
            WriteModel::Delete { .. } => WriteKind::Delete,
        }
    }

    /// Wire entry inside an `insert`/`update`/`delete` command.
    pub fn to_document(&self) -> Document {
        match self {
            WriteModel::Insert { document } => document.clone(),
            WriteModel::Update {
                filter,
                update,
                multi,
                upsert,
            } => bson::doc! { "q": filter.clone(), "u": update.clone(), "multi": *multi, "upsert": *upsert },
            WriteModel::Delete { filter, limit_one } => {
                bson::doc! { "q": filter.clone(), "limit": i32::from(*limit_one) }
            }
        }
    }
}

/// An ordered (by default) list of write operations sent as one unit.
///
/// # Example
/// ```rust
/// use docwire::bulk::{BulkWrite, DeleteOptions, UpdateOptions};
/// use bson::doc;
///
/// let mut bulk = BulkWrite::default();
/// let id = bulk.insert(doc! { "name": "ada" });
/// bulk.update(doc! { "_id": id }, doc! { "$set": { "admin": true } }, UpdateOptions::default())
///     .unwrap();
/// bulk.delete(doc! { "name": "bob" }, DeleteOptions { limit_one: true });
///
/// assert_eq!(bulk.len(), 3);
/// assert!(bulk.is_ordered());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWrite {
    ordered: bool,
    operations: Vec<WriteModel>,
}

impl Default for BulkWrite {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BulkWrite {
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            operations: Vec::new(),
        }
    }

    /// Queues an insert and returns the document's `_id`, generating an `ObjectId` when
    /// the document has none. The generated id is placed first.
    pub fn insert(&mut self, document: Document) -> Bson {
        let (document, id) = match document.get("_id") {
            Some(id) => {
                let id = id.clone();
                (document, id)
            }
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = Document::new();
                with_id.insert("_id", id.clone());
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                (with_id, id)
            }
        };

        self.operations.push(WriteModel::Insert { document });
        id
    }

    /// Queues an update. A document whose first key starts with `$` is an update
    /// expression; anything else replaces the matched document and cannot be `multi`.
    pub fn update(
        &mut self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<(), Error> {
        let is_replacement = update.keys().next().is_none_or(|k| !k.starts_with('$'));
        if is_replacement && options.multi {
            return Err(Error::invalid_argument(
                "Replacement document conflicts with true \"multi\" option",
            ));
        }

        self.operations.push(WriteModel::Update {
            filter,
            update,
            multi: options.multi,
            upsert: options.upsert,
        });
        Ok(())
    }

    pub fn delete(&mut self, filter: Document, options: DeleteOptions) {
        self.operations.push(WriteModel::Delete {
            filter,
            limit_one: options.limit_one,
        });
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[WriteModel] {
        &self.operations
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn insert_generates_leading_object_id() {
        let mut bulk = BulkWrite::default();
        let id = bulk.insert(doc! { "x": 1 });

        let WriteModel::Insert { document } = &bulk.operations()[0] else {
            panic!("expected an insert");
        };
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(document.get("_id"), Some(&id));
    }

    #[test]
    fn insert_keeps_existing_id() {
        let mut bulk = BulkWrite::default();
        let id = bulk.insert(doc! { "x": 1, "_id": 7 });
        assert_eq!(id, Bson::Int32(7));
        assert_eq!(bulk.operations()[0].to_document(), doc! { "x": 1, "_id": 7 });
    }

    #[test]
    fn delete_and_update_wire_entries() {
        let mut bulk = BulkWrite::new(false);
        bulk.delete(doc! { "a": 1 }, DeleteOptions { limit_one: true });
        bulk.update(
            doc! { "a": 2 },
            doc! { "$inc": { "n": 1 } },
            UpdateOptions {
                multi: true,
                upsert: true,
            },
        )
        .unwrap();

        assert!(!bulk.is_ordered());
        assert_eq!(
            bulk.operations()[0].to_document(),
            doc! { "q": { "a": 1 }, "limit": 1 }
        );
        assert_eq!(
            bulk.operations()[1].to_document(),
            doc! { "q": { "a": 2 }, "u": { "$inc": { "n": 1 } }, "multi": true, "upsert": true }
        );
    }

    #[test]
    #[should_panic(expected = "Replacement document conflicts")]
    fn replacement_cannot_be_multi() {
        let mut bulk = BulkWrite::default();
        bulk.update(
            doc! {},
            doc! { "name": "replaced" },
            UpdateOptions {
                multi: true,
                upsert: false,
            },
        )
        .unwrap();
    }
}
