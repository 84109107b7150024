//! Write concern, read preference and server selection hints.
use std::{fmt, str::FromStr};

use bson::{Bson, Document, doc};

use crate::Error;

/// Identifies one server connection inside a client; used as an affinity hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `w` component of a write concern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Acknowledgment {
    /// Use the server's default.
    #[default]
    Default,
    Nodes(i32),
    Majority,
    Tag(String),
}

impl FromStr for Acknowledgment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("majority") {
            return Ok(Acknowledgment::Majority);
        }
        match s.parse::<i32>() {
            Ok(n) if n < 0 => Err(Error::invalid_argument(format!(
                "write concern w must be non-negative, {n} given"
            ))),
            Ok(n) => Ok(Acknowledgment::Nodes(n)),
            Err(_) if s.is_empty() => Err(Error::invalid_argument("empty write concern w")),
            Err(_) => Ok(Acknowledgment::Tag(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteConcern {
    pub w: Acknowledgment,
    /// Milliseconds; 0 waits forever.
    pub wtimeout: i32,
    pub journal: Option<bool>,
    pub fsync: Option<bool>,
}

impl WriteConcern {
    pub fn new(w: Acknowledgment) -> Self {
        Self {
            w,
            ..Default::default()
        }
    }

    pub fn majority() -> Self {
        Self::new(Acknowledgment::Majority)
    }

    pub fn unacknowledged() -> Self {
        Self::new(Acknowledgment::Nodes(0))
    }

    pub fn is_default(&self) -> bool {
        self == &WriteConcern::default()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.w != Acknowledgment::Nodes(0)
            || self.journal == Some(true)
            || self.fsync == Some(true)
    }

    /// Wire form, or `None` when the server default applies.
    pub fn to_document(&self) -> Option<Document> {
        if self.is_default() {
            return None;
        }

        let mut out = Document::new();
        match &self.w {
            Acknowledgment::Default => {}
            Acknowledgment::Nodes(n) => {
                out.insert("w", *n);
            }
            Acknowledgment::Majority => {
                out.insert("w", "majority");
            }
            Acknowledgment::Tag(tag) => {
                out.insert("w", tag.as_str());
            }
        }
        if self.wtimeout > 0 {
            out.insert("wtimeout", self.wtimeout);
        }
        if let Some(j) = self.journal {
            out.insert("j", j);
        }
        if let Some(fsync) = self.fsync {
            out.insert("fsync", fsync);
        }
        Some(out)
    }

    /// Introspection form exposed on write results.
    pub fn debug_document(&self) -> Document {
        let mut out = Document::new();
        match &self.w {
            Acknowledgment::Tag(tag) => {
                out.insert("w", tag.as_str());
            }
            Acknowledgment::Majority => {
                out.insert("w", "majority");
            }
            Acknowledgment::Nodes(n) => {
                out.insert("w", *n);
            }
            Acknowledgment::Default => {}
        }
        out.insert("wmajority", self.w == Acknowledgment::Majority);
        out.insert("wtimeout", self.wtimeout);
        out.insert("fsync", self.fsync.unwrap_or(false));
        out.insert("journal", self.journal.unwrap_or(false));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadMode::Primary => "primary",
            ReadMode::PrimaryPreferred => "primaryPreferred",
            ReadMode::Secondary => "secondary",
            ReadMode::SecondaryPreferred => "secondaryPreferred",
            ReadMode::Nearest => "nearest",
        }
    }

    /// Numeric mode used in debug output.
    pub fn code(self) -> i32 {
        match self {
            ReadMode::Primary => 1,
            ReadMode::Secondary => 2,
            ReadMode::PrimaryPreferred => 5,
            ReadMode::SecondaryPreferred => 6,
            ReadMode::Nearest => 10,
        }
    }
}

impl FromStr for ReadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(ReadMode::Primary),
            "primarypreferred" => Ok(ReadMode::PrimaryPreferred),
            "secondary" => Ok(ReadMode::Secondary),
            "secondarypreferred" => Ok(ReadMode::SecondaryPreferred),
            "nearest" => Ok(ReadMode::Nearest),
            other => Err(Error::invalid_argument(format!(
                "unknown read preference mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPreference {
    pub mode: ReadMode,
    pub tags: Vec<Document>,
}

impl ReadPreference {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            tags: Vec::new(),
        }
    }

    /// Tag sets only apply to non-primary modes.
    pub fn with_tags(mut self, tags: Vec<Document>) -> Result<Self, Error> {
        if self.mode == ReadMode::Primary && !tags.is_empty() {
            return Err(Error::invalid_argument(
                "tag sets are not allowed with primary read preference",
            ));
        }
        self.tags = tags;
        Ok(self)
    }

    pub fn is_primary(&self) -> bool {
        self.mode == ReadMode::Primary
    }

    /// `$readPreference` wire form.
    pub fn to_document(&self) -> Document {
        let mut out = doc! { "mode": self.mode.as_str() };
        if !self.tags.is_empty() {
            out.insert(
                "tags",
                self.tags.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            );
        }
        out
    }

    pub fn debug_document(&self) -> Document {
        let tags = if self.tags.is_empty() {
            Bson::Null
        } else {
            Bson::Array(self.tags.iter().cloned().map(Bson::Document).collect())
        };
        doc! { "mode": self.mode.code(), "tags": tags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_write_concern_has_no_wire_form() {
        assert!(WriteConcern::default().to_document().is_none());
        assert_eq!(
            WriteConcern::majority().to_document().unwrap(),
            doc! { "w": "majority" }
        );
    }

    #[test]
    fn acknowledgment_parsing() {
        let inputs = vec![
            ("majority", Acknowledgment::Majority),
            ("MAJORITY", Acknowledgment::Majority),
            ("2", Acknowledgment::Nodes(2)),
            ("dc-east", Acknowledgment::Tag("dc-east".into())),
        ];

        for (input, expected) in inputs {
            assert_eq!(input.parse::<Acknowledgment>().unwrap(), expected);
        }
        assert!("-1".parse::<Acknowledgment>().is_err());
    }

    #[test]
    fn unacknowledged_unless_journaled() {
        let mut wc = WriteConcern::unacknowledged();
        assert!(!wc.is_acknowledged());
        wc.journal = Some(true);
        assert!(wc.is_acknowledged());
    }

    #[test]
    fn write_concern_debug_projection() {
        let wc = WriteConcern {
            w: Acknowledgment::Majority,
            wtimeout: 500,
            journal: Some(true),
            fsync: None,
        };
        assert_eq!(
            wc.debug_document(),
            doc! { "w": "majority", "wmajority": true, "wtimeout": 500, "fsync": false, "journal": true }
        );
    }

    #[test]
    fn primary_rejects_tags() {
        let err = ReadPreference::new(ReadMode::Primary)
            .with_tags(vec![doc! { "dc": "ny" }])
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

        let rp = ReadPreference::new(ReadMode::Nearest)
            .with_tags(vec![doc! { "dc": "ny" }])
            .unwrap();
        assert_eq!(
            rp.to_document(),
            doc! { "mode": "nearest", "tags": [{ "dc": "ny" }] }
        );
    }
}
