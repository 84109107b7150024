//! `"<database>.<collection>"` namespaces.
use std::{fmt, str::FromStr};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// Splits on the first `.`; everything after it, dots included, is the collection.
    pub fn parse(namespace: &str) -> Result<Self, Error> {
        let (db, collection) = namespace
            .split_once('.')
            .ok_or_else(|| Error::invalid_argument("Invalid namespace provided"))?;

        Ok(Self::new(db, collection))
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::parse(s)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use crate::ErrorKind;

    use super::*;

    #[test]
    fn splits_on_first_dot() {
        let inputs = vec![
            ("db.coll", ("db", "coll")),
            ("db.system.indexes", ("db", "system.indexes")),
            ("db.", ("db", "")),
            (".coll", ("", "coll")),
        ];

        for (input, (db, collection)) in inputs {
            let ns: Namespace = input.parse().unwrap();
            assert_eq!(ns, Namespace::new(db, collection));
        }
    }

    #[test]
    fn missing_dot_is_invalid_argument() {
        let err = Namespace::parse("nodot").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn display_round_trips() {
        let ns = Namespace::parse("app.users.archive").unwrap();
        assert_eq!(ns.to_string(), "app.users.archive");
    }
}
