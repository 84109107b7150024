//! Query specifications.
//!
//! A [`QuerySpec`] is built once from a filter and an options document and is immutable
//! afterwards. Sort and modifiers are folded into a legacy-style wire query
//! (`{ <modifiers>, "$orderby": <sort>, "$query": <filter> }`); the projection and the
//! numeric/boolean options are kept alongside it.
use std::ops::{BitOr, BitOrAssign};

use bson::{Bson, Document};

use crate::Error;

/// Cursor behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const NONE: QueryFlags = QueryFlags(0);
    pub const TAILABLE_CURSOR: QueryFlags = QueryFlags(1 << 1);
    pub const SLAVE_OK: QueryFlags = QueryFlags(1 << 2);
    pub const OPLOG_REPLAY: QueryFlags = QueryFlags(1 << 3);
    pub const NO_CURSOR_TIMEOUT: QueryFlags = QueryFlags(1 << 4);
    pub const AWAIT_DATA: QueryFlags = QueryFlags(1 << 5);
    pub const EXHAUST: QueryFlags = QueryFlags(1 << 6);
    pub const PARTIAL: QueryFlags = QueryFlags(1 << 7);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        QueryFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const FLAG_OPTIONS: [(&str, QueryFlags); 7] = [
    ("tailable", QueryFlags::TAILABLE_CURSOR),
    ("slaveOk", QueryFlags::SLAVE_OK),
    ("oplogReplay", QueryFlags::OPLOG_REPLAY),
    ("noCursorTimeout", QueryFlags::NO_CURSOR_TIMEOUT),
    ("awaitData", QueryFlags::AWAIT_DATA),
    ("exhaust", QueryFlags::EXHAUST),
    ("partial", QueryFlags::PARTIAL),
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    query: Document,
    projection: Option<Document>,
    skip: i32,
    limit: i32,
    batch_size: i32,
    flags: QueryFlags,
}

impl QuerySpec {
    /// Builds a query from a filter document and an optional options document.
    ///
    /// Recognized options are `batchSize`, `limit`, `skip`, the boolean cursor flags,
    /// `modifiers`, `projection` and `sort`; anything else is ignored.
    pub fn new(filter: impl Into<Bson>, options: Option<&Document>) -> Result<Self, Error> {
        let filter = match filter.into() {
            Bson::Document(filter) => filter,
            other => {
                return Err(Error::invalid_argument(format!(
                    "Expected filter to be array or object, {:?} given",
                    other.element_type()
                )));
            }
        };

        let mut spec = QuerySpec::default();
        let mut query = Document::new();

        if let Some(options) = options {
            spec.batch_size = fetch_i32(options, "batchSize")?;
            spec.limit = fetch_i32(options, "limit")?;
            spec.skip = fetch_i32(options, "skip")?;

            for (key, flag) in FLAG_OPTIONS {
                if fetch_bool(options, key)? {
                    spec.flags |= flag;
                }
            }

            if let Some(modifiers) = fetch_document(options, "modifiers")? {
                for (key, value) in modifiers {
                    query.insert(key.clone(), value.clone());
                }
            }
            spec.projection = fetch_document(options, "projection")?.cloned();
            if let Some(sort) = fetch_document(options, "sort")? {
                query.insert("$orderby", sort.clone());
            }
        }

        query.insert("$query", filter);
        spec.query = query;
        Ok(spec)
    }

    /// Query with a filter and no options.
    pub fn filter(filter: Document) -> Self {
        let mut query = Document::new();
        query.insert("$query", filter);
        Self {
            query,
            ..Default::default()
        }
    }

    /// The wire query, including `$query`, `$orderby` and modifiers.
    pub fn query(&self) -> &Document {
        &self.query
    }

    pub fn filter_document(&self) -> Option<&Document> {
        self.query.get_document("$query").ok()
    }

    pub fn sort(&self) -> Option<&Document> {
        self.query.get_document("$orderby").ok()
    }

    /// `$`-prefixed modifiers other than `$query` and `$orderby`.
    pub fn modifiers(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.query
            .iter()
            .filter(|(k, _)| k.as_str() != "$query" && k.as_str() != "$orderby")
    }

    pub fn projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    pub fn skip(&self) -> i32 {
        self.skip
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }
}

fn fetch_i32(options: &Document, key: &str) -> Result<i32, Error> {
    let out_of_range = || Error::invalid_argument(format!("Expected {key} to fit in 32 bits"));

    match options.get(key) {
        None | Some(Bson::Null) => Ok(0),
        Some(Bson::Int32(v)) => Ok(*v),
        Some(Bson::Int64(v)) => i32::try_from(*v).map_err(|_| out_of_range()),
        Some(Bson::Double(v)) if v.fract() == 0.0 => {
            if *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX) {
                Ok(*v as i32)
            } else {
                Err(out_of_range())
            }
        }
        Some(other) => Err(Error::invalid_argument(format!(
            "Expected {key} to be an integer, {:?} given",
            other.element_type()
        ))),
    }
}

fn fetch_bool(options: &Document, key: &str) -> Result<bool, Error> {
    match options.get(key) {
        None | Some(Bson::Null) => Ok(false),
        Some(Bson::Boolean(v)) => Ok(*v),
        Some(Bson::Int32(v)) => Ok(*v != 0),
        Some(Bson::Int64(v)) => Ok(*v != 0),
        Some(Bson::Double(v)) => Ok(*v != 0.0),
        Some(other) => Err(Error::invalid_argument(format!(
            "Expected {key} to be a boolean, {:?} given",
            other.element_type()
        ))),
    }
}

fn fetch_document<'a>(options: &'a Document, key: &str) -> Result<Option<&'a Document>, Error> {
    match options.get(key) {
        None => Ok(None),
        Some(Bson::Document(doc)) => Ok(Some(doc)),
        Some(other) => Err(Error::invalid_argument(format!(
            "Expected {key} to be array or object, {:?} given",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn parses_numeric_and_flag_options() {
        let options = doc! {
            "batchSize": 10,
            "limit": 5_i64,
            "skip": 2.0,
            "tailable": true,
            "awaitData": 1,
            "exhaust": false,
            "unknownOption": "ignored",
        };
        let spec = QuerySpec::new(doc! { "x": 1 }, Some(&options)).unwrap();

        assert_eq!(spec.batch_size(), 10);
        assert_eq!(spec.limit(), 5);
        assert_eq!(spec.skip(), 2);
        assert!(spec.flags().contains(QueryFlags::TAILABLE_CURSOR | QueryFlags::AWAIT_DATA));
        assert!(!spec.flags().contains(QueryFlags::EXHAUST));
    }

    #[test]
    fn builds_wire_query_with_modifiers_sort_and_filter() {
        let options = doc! {
            "modifiers": { "$comment": "audit", "$query": { "shadowed": true } },
            "sort": { "x": -1 },
            "projection": { "_id": 0 },
        };
        let spec = QuerySpec::new(doc! { "x": { "$gt": 1 } }, Some(&options)).unwrap();

        assert_eq!(
            spec.query(),
            &doc! {
                "$comment": "audit",
                "$query": { "x": { "$gt": 1 } },
                "$orderby": { "x": -1 },
            }
        );
        assert_eq!(spec.filter_document(), Some(&doc! { "x": { "$gt": 1 } }));
        assert_eq!(spec.sort(), Some(&doc! { "x": -1 }));
        assert_eq!(spec.projection(), Some(&doc! { "_id": 0 }));
        assert_eq!(spec.modifiers().count(), 1);
    }

    #[test]
    #[should_panic(expected = "Expected filter to be array or object")]
    fn rejects_non_document_filter() {
        QuerySpec::new(Bson::String("x".into()), None).unwrap();
    }

    #[test]
    #[should_panic(expected = "Expected sort to be array or object")]
    fn rejects_non_document_sort() {
        QuerySpec::new(doc! {}, Some(&doc! { "sort": 1 })).unwrap();
    }

    #[test]
    fn rejects_out_of_range_batch_size() {
        let err = QuerySpec::new(doc! {}, Some(&doc! { "batchSize": i64::MAX })).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn filter_shortcut_matches_empty_options() {
        let spec = QuerySpec::filter(doc! { "a": 1 });
        assert_eq!(spec, QuerySpec::new(doc! { "a": 1 }, None).unwrap());
    }
}
