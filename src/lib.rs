pub mod analyzer;
pub mod codec;
pub mod collector;
pub mod config;
pub mod matching;
pub mod parser;
pub mod query;
pub mod schema;
pub mod scoring;
pub mod searcher;
pub mod segment;
pub mod segment_list;
pub mod store;
pub mod toc;
pub mod writer;

mod io;

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

use std::{ffi::OsString, io as stdio, str::Utf8Error};

/// Small, short-lived maps keyed by interned identifiers (field ids, term
/// dictionary keys, segment ids) don't need a DoS-resistant hasher; `fnv`
/// is faster for them, matching the teacher's `lib.rs` alias.
pub(crate) use fnv::FnvHashMap as HashMap;

/// Every fallible operation in this crate returns this one error type; callers
/// match on `Error` rather than juggling a per-module error zoo.
#[derive(Debug)]
pub enum Error {
    /// Another writer holds `WRITELOCK`.
    LockError,
    /// A mutation was attempted against a read-only `Storage`.
    ReadOnlyError,
    /// No readable TOC generation exists.
    TocNotFound,
    /// The index has never had a successful commit.
    EmptyIndexError,
    /// A codec file's magic did not match what the reader expected.
    FileHeaderError { expected: [u8; 4], found: [u8; 4] },
    /// A document field was unknown, or its value didn't fit the field type.
    SchemaError(String),
    /// A query string could not be parsed; the caller may substitute a
    /// `Query::Null` for the offending clause and keep going.
    QueryParserError(String),
    /// Search exceeded its deadline.
    TimeLimit,
    /// A matcher was asked for positions/chars/payloads its postings don't store.
    UnsupportedFeature(&'static str),
    /// A cursor or reader was advanced past its end.
    OverrunError,
    IO(stdio::Error),
    Json(serde_json::Error),
    Utf8(Utf8Error),
    BadFileName(OsString),
    Context(String, Box<Error>),
}

impl Error {
    pub fn with_context<S>(self, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Context(msg.into(), Box::new(self))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::error::Error for Error {}

impl From<stdio::Error> for Error {
    fn from(err: stdio::Error) -> Error {
        Error::IO(err)
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}
impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error::Utf8(err)
    }
}

/// A 32-bit per-segment document identifier. Document numbers are dense and
/// start at 0 within a segment; they are not stable across merges.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
#[repr(transparent)]
pub struct DocId(pub u32);

impl DocId {
    pub const fn no_more() -> DocId {
        DocId(std::u32::MAX)
    }
    pub fn is_done(&self) -> bool {
        self.0 == std::u32::MAX
    }
    pub fn next(&self) -> DocId {
        DocId(self.0 + 1)
    }
}

impl Default for DocId {
    fn default() -> Self {
        DocId(0)
    }
}

/// Which feature arrays a field's postings carry (spec §3's posting tuple).
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone, Serialize, Deserialize)]
pub struct IndexedForm {
    pub lengths: bool,
    pub weights: bool,
    pub positions: bool,
    pub chars: bool,
    pub payloads: bool,
}

impl IndexedForm {
    pub const fn docs_only() -> Self {
        IndexedForm {
            lengths: false,
            weights: false,
            positions: false,
            chars: false,
            payloads: false,
        }
    }
    pub const fn with_weights() -> Self {
        IndexedForm {
            lengths: true,
            weights: true,
            positions: false,
            chars: false,
            payloads: false,
        }
    }
    pub const fn with_positions() -> Self {
        IndexedForm {
            lengths: true,
            weights: true,
            positions: true,
            chars: false,
            payloads: false,
        }
    }
}
