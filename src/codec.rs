//! Document codec boundary.
//!
//! Results decode every reply document through a [`DocumentCodec`] before handing it to
//! the caller. [`RawCodec`] passes documents through untouched; [`TypedCodec`] maps them
//! to and from any serde type.
use std::marker::PhantomData;

use bson::Document;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Error,
    classify::codes,
    error::{ErrorDomain, LowLevelError},
};

pub trait DocumentCodec {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Document, Error>;

    fn decode(&self, document: Document) -> Result<Self::Value, Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl DocumentCodec for RawCodec {
    type Value = Document;

    fn encode(&self, value: &Document) -> Result<Document, Error> {
        Ok(value.clone())
    }

    fn decode(&self, document: Document) -> Result<Document, Error> {
        Ok(document)
    }
}

pub struct TypedCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TypedCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedCodec<{}>", std::any::type_name::<T>())
    }
}

fn invalid_bson(reason: impl std::fmt::Display) -> Error {
    LowLevelError::new(ErrorDomain::Bson, codes::BSON_INVALID, reason.to_string()).into()
}

impl<T: Serialize + DeserializeOwned> DocumentCodec for TypedCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Document, Error> {
        bson::to_document(value).map_err(invalid_bson)
    }

    fn decode(&self, document: Document) -> Result<T, Error> {
        bson::from_document(document).map_err(invalid_bson)
    }
}
