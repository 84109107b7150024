//! Lazy result sequences.
//!
//! A [`QueryResult`] turns either server result shape into one forward-only sequence of
//! decoded values:
//!
//! - a *cursor* result: a live [`ServerCursor`] plus the document already fetched from it;
//! - a *command cursor* result: a first batch embedded in the command reply, followed by
//!   whatever the adopted cursor returns.
//!
//! Iteration runs either through the built-in state machine or through a caller-supplied
//! [`DocumentSequence`], chosen when the result is built. At most one decoded value is
//! held at a time; moving forward releases the current one first.
//!
//! # Example
//! ```rust,no_run
//! use docwire::Manager;
//! use bson::doc;
//!
//! let manager = Manager::new("mongodb://localhost:27017", None).unwrap();
//! let mut result = manager.execute_command("admin", &doc! { "ping": 1 }).unwrap();
//!
//! for reply in result.iter() {
//!     println!("{}", reply.unwrap());
//! }
//! ```
use bson::{Bson, Document, doc};
use log::warn;

use crate::{
    Error,
    client::{CursorId, ServerCursor},
    codec::{DocumentCodec, RawCodec},
    namespace::Namespace,
    options::ServerId,
};

/// Iteration protocol shared by the built-in state machine and caller-supplied sequences.
pub trait DocumentSequence {
    type Item;

    /// Positions on the first element. Only the first rewind has an effect; later calls
    /// leave the position unchanged.
    fn rewind(&mut self) -> Result<(), Error>;

    /// Whether a current value is held.
    fn valid(&self) -> bool;

    fn current(&self) -> Option<&Self::Item>;

    /// Zero-based position since the rewind, while a value is held.
    fn key(&self) -> Option<usize>;

    /// Releases the current value, then positions on the next one if there is one.
    fn advance(&mut self) -> Result<(), Error>;

    /// Moves the current value out, leaving the position invalid.
    fn take_current(&mut self) -> Option<Self::Item>;
}

/// Raw documents behind a result, in delivery order: the embedded first batch, then the
/// prefetched document, then the live cursor.
pub struct ResultSource {
    cursor: Option<Box<dyn ServerCursor>>,
    first_batch: Option<Vec<Document>>,
    batch_pos: usize,
    first_document: Option<Document>,
}

impl ResultSource {
    pub(crate) fn from_cursor(cursor: Box<dyn ServerCursor>, first: Option<Document>) -> Self {
        Self {
            cursor: Some(cursor),
            first_batch: None,
            batch_pos: 0,
            first_document: first,
        }
    }

    pub(crate) fn command_cursor(cursor: Box<dyn ServerCursor>, first_batch: Vec<Document>) -> Self {
        Self {
            cursor: Some(cursor),
            first_batch: Some(first_batch),
            batch_pos: 0,
            first_document: None,
        }
    }

    /// `Ok(None)` once every source is drained.
    pub fn next_document(&mut self) -> Result<Option<Document>, Error> {
        if let Some(batch) = &self.first_batch {
            if let Some(doc) = batch.get(self.batch_pos) {
                self.batch_pos += 1;
                return Ok(Some(doc.clone()));
            }
        }

        if let Some(doc) = self.first_document.take() {
            return Ok(Some(doc));
        }

        match self.cursor.as_mut() {
            Some(cursor) => Ok(cursor.next_document()?),
            None => Ok(None),
        }
    }

    pub fn cursor(&self) -> Option<&dyn ServerCursor> {
        self.cursor.as_deref()
    }

    fn release_cursor(&mut self) {
        self.cursor = None;
    }

    fn release_first_batch(&mut self) {
        self.first_batch = None;
        self.first_document = None;
    }
}

/// Built-in iteration over a [`ResultSource`].
struct Builtin<C: DocumentCodec> {
    source: ResultSource,
    codec: C,
    current: Option<C::Value>,
    key: usize,
    rewound: bool,
}

impl<C: DocumentCodec> Builtin<C> {
    fn fetch(&mut self) -> Result<(), Error> {
        if let Some(doc) = self.source.next_document()? {
            self.current = Some(self.codec.decode(doc)?);
        }
        Ok(())
    }
}

impl<C: DocumentCodec> DocumentSequence for Builtin<C> {
    type Item = C::Value;

    fn rewind(&mut self) -> Result<(), Error> {
        if self.rewound {
            return Ok(());
        }
        self.rewound = true;
        self.current = None;
        self.key = 0;
        self.fetch()
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn current(&self) -> Option<&C::Value> {
        self.current.as_ref()
    }

    fn key(&self) -> Option<usize> {
        self.current.as_ref().map(|_| self.key)
    }

    fn advance(&mut self) -> Result<(), Error> {
        if !self.rewound {
            return self.rewind();
        }
        self.current = None;
        self.fetch()?;
        if self.current.is_some() {
            self.key += 1;
        }
        Ok(())
    }

    fn take_current(&mut self) -> Option<C::Value> {
        self.current.take()
    }
}

enum Iteration<C: DocumentCodec> {
    Builtin(Builtin<C>),
    External(Box<dyn DocumentSequence<Item = C::Value>>),
    Released,
}

pub struct QueryResult<C: DocumentCodec = RawCodec> {
    iteration: Iteration<C>,
    namespace: Option<Namespace>,
    server_id: ServerId,
    is_command_cursor: bool,
}

impl QueryResult<RawCodec> {
    /// Cursor-shaped result with the document already fetched, if any.
    pub fn from_cursor(
        cursor: Box<dyn ServerCursor>,
        first: Option<Document>,
        namespace: Option<Namespace>,
    ) -> Self {
        let server_id = cursor.server_id();
        Self::builtin(
            ResultSource::from_cursor(cursor, first),
            namespace,
            server_id,
            false,
        )
    }

    /// Command-cursor result: `first_batch` is drained before `cursor` is consulted.
    pub fn command_cursor(
        cursor: Box<dyn ServerCursor>,
        first_batch: Vec<Document>,
        namespace: Namespace,
    ) -> Self {
        let server_id = cursor.server_id();
        Self::builtin(
            ResultSource::command_cursor(cursor, first_batch),
            Some(namespace),
            server_id,
            true,
        )
    }

    fn builtin(
        source: ResultSource,
        namespace: Option<Namespace>,
        server_id: ServerId,
        is_command_cursor: bool,
    ) -> Self {
        Self {
            iteration: Iteration::Builtin(Builtin {
                source,
                codec: RawCodec,
                current: None,
                key: 0,
                rewound: false,
            }),
            namespace,
            server_id,
            is_command_cursor,
        }
    }
}

impl<C: DocumentCodec> QueryResult<C> {
    fn unstarted_source(mut self) -> Result<(ResultSource, ResultHeader), Error> {
        let iteration = std::mem::replace(&mut self.iteration, Iteration::Released);
        let header = ResultHeader {
            namespace: self.namespace.take(),
            server_id: self.server_id,
            is_command_cursor: self.is_command_cursor,
        };
        match iteration {
            Iteration::Builtin(builtin) if !builtin.rewound => Ok((builtin.source, header)),
            Iteration::Builtin(_) => Err(Error::invalid_argument(
                "Cannot reconfigure a result after iteration has started",
            )),
            Iteration::External(_) => Err(Error::invalid_argument(
                "Cannot reconfigure a result that delegates to a custom sequence",
            )),
            Iteration::Released => Err(Error::invalid_argument(
                "Cannot reconfigure a released result",
            )),
        }
    }

    /// Decodes documents with `codec` instead. Only allowed before iteration starts.
    pub fn with_codec<D: DocumentCodec>(self, codec: D) -> Result<QueryResult<D>, Error> {
        let (source, header) = self.unstarted_source()?;
        Ok(QueryResult {
            iteration: Iteration::Builtin(Builtin {
                source,
                codec,
                current: None,
                key: 0,
                rewound: false,
            }),
            namespace: header.namespace,
            server_id: header.server_id,
            is_command_cursor: header.is_command_cursor,
        })
    }

    /// Hands the raw documents to a caller-supplied sequence; every later iteration call
    /// is delegated to it. Only allowed before iteration starts.
    pub fn with_sequence<F>(self, factory: F) -> Result<Self, Error>
    where
        F: FnOnce(ResultSource) -> Box<dyn DocumentSequence<Item = C::Value>>,
    {
        let (source, header) = self.unstarted_source()?;
        Ok(Self {
            iteration: Iteration::External(factory(source)),
            namespace: header.namespace,
            server_id: header.server_id,
            is_command_cursor: header.is_command_cursor,
        })
    }

    fn sequence(&mut self) -> Result<&mut dyn DocumentSequence<Item = C::Value>, Error> {
        match &mut self.iteration {
            Iteration::Builtin(builtin) => Ok(builtin),
            Iteration::External(external) => Ok(external.as_mut()),
            Iteration::Released => Err(Error::runtime("Result has already been released")),
        }
    }

    pub fn rewind(&mut self) -> Result<(), Error> {
        self.sequence()?.rewind()
    }

    pub fn advance(&mut self) -> Result<(), Error> {
        self.sequence()?.advance()
    }

    pub fn valid(&self) -> bool {
        match &self.iteration {
            Iteration::Builtin(builtin) => builtin.valid(),
            Iteration::External(external) => external.valid(),
            Iteration::Released => false,
        }
    }

    pub fn current(&self) -> Option<&C::Value> {
        match &self.iteration {
            Iteration::Builtin(builtin) => builtin.current(),
            Iteration::External(external) => external.current(),
            Iteration::Released => None,
        }
    }

    pub fn key(&self) -> Option<usize> {
        match &self.iteration {
            Iteration::Builtin(builtin) => builtin.key(),
            Iteration::External(external) => external.key(),
            Iteration::Released => None,
        }
    }

    /// Drops the current value without moving forward.
    pub fn invalidate_current(&mut self) {
        if let Ok(sequence) = self.sequence() {
            sequence.take_current();
        }
    }

    pub fn iter(&mut self) -> Iter<'_, C> {
        Iter {
            result: self,
            started: false,
            finished: false,
        }
    }

    /// Cursor view over this result. Nothing is fetched until it is iterated.
    pub fn cursor(&mut self) -> Cursor<'_, C> {
        Cursor { result: self }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn is_command_cursor(&self) -> bool {
        self.is_command_cursor
    }

    pub fn cursor_id(&self) -> Option<CursorId> {
        match &self.iteration {
            Iteration::Builtin(builtin) => builtin.source.cursor().map(|c| c.id()),
            _ => None,
        }
    }

    /// Releases the current value, the live cursor and the copied first batch, in that
    /// order. Safe to call more than once.
    pub fn free(&mut self) {
        if let Iteration::Builtin(builtin) = &mut self.iteration {
            builtin.current = None;
            builtin.source.release_cursor();
            builtin.source.release_first_batch();
            return;
        }
        self.iteration = Iteration::Released;
    }

    /// Introspection view: cursor position and request, embedded first batch, server.
    pub fn debug_info(&self) -> Document {
        let (cursor, first_batch) = match &self.iteration {
            Iteration::Builtin(builtin) => (
                builtin
                    .source
                    .cursor()
                    .map_or(Bson::Null, |c| Bson::Document(c.snapshot().to_document())),
                builtin.source.first_batch.as_ref().map_or(Bson::Null, |batch| {
                    Bson::Array(batch.iter().cloned().map(Bson::Document).collect())
                }),
            ),
            _ => (Bson::Null, Bson::Null),
        };

        doc! {
            "cursor": cursor,
            "firstBatch": first_batch,
            "namespace": self.namespace.as_ref().map_or(Bson::Null, |ns| Bson::String(ns.to_string())),
            "server_id": i64::from(self.server_id.0),
            "is_command_cursor": self.is_command_cursor,
        }
    }
}

/// Namespace, server and shape carried over when a result is rebuilt.
struct ResultHeader {
    namespace: Option<Namespace>,
    server_id: ServerId,
    is_command_cursor: bool,
}

impl<C: DocumentCodec> Drop for QueryResult<C> {
    fn drop(&mut self) {
        self.free();
    }
}

/// Iterator over a result's values. The first call rewinds; each later call advances.
/// An error is yielded once and ends the iteration.
pub struct Iter<'r, C: DocumentCodec> {
    result: &'r mut QueryResult<C>,
    started: bool,
    finished: bool,
}

impl<C: DocumentCodec> Iter<'_, C> {
    fn step(&mut self) -> Result<Option<C::Value>, Error> {
        let sequence = self.result.sequence()?;
        if !self.started {
            self.started = true;
            sequence.rewind()?;
            if sequence.valid() {
                return Ok(sequence.take_current());
            }
        }
        sequence.advance()?;
        Ok(sequence.take_current())
    }
}

impl<C: DocumentCodec> Iterator for Iter<'_, C> {
    type Item = Result<C::Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.step() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                warn!("result iteration failed: {e}");
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Thin cursor handle; all iteration goes through the result it borrows.
pub struct Cursor<'r, C: DocumentCodec = RawCodec> {
    result: &'r mut QueryResult<C>,
}

impl<'r, C: DocumentCodec> Cursor<'r, C> {
    pub fn id(&self) -> Option<CursorId> {
        self.result.cursor_id()
    }

    pub fn server_id(&self) -> ServerId {
        self.result.server_id()
    }

    pub fn iter(&mut self) -> Iter<'_, C> {
        self.result.iter()
    }

    /// Collects every remaining value.
    pub fn to_vec(&mut self) -> Result<Vec<C::Value>, Error> {
        self.iter().collect()
    }
}

impl<'r, C: DocumentCodec> IntoIterator for Cursor<'r, C> {
    type Item = Result<C::Value, Error>;
    type IntoIter = Iter<'r, C>;

    fn into_iter(self) -> Self::IntoIter {
        let Cursor { result } = self;
        result.iter()
    }
}
