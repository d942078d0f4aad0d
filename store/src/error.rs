//! Store error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Persisted bytes are shorter than required or structurally malformed.
    #[error("{0}")]
    Data(String),

    /// An engine call (put/delete/cursor/begin/commit) failed.
    #[error("database error: {0}")]
    Database(String),

    /// A caller-supplied record could not be serialized or is inconsistent.
    #[error("input error: {0}")]
    Input(String),

    /// The namespace holds no transaction store.
    #[error("no transaction store exists in this namespace")]
    NoExists,

    /// The namespace already holds data.
    #[error("a transaction store already exists in this namespace")]
    AlreadyExists,

    /// The stored schema version is newer than this build understands.
    #[error("recorded version {version} is newer than latest understood version {latest}")]
    UnknownVersion { version: u32, latest: u32 },

    /// A conditionally-present field was queried but never recorded.
    #[error("value was never recorded: {0}")]
    ValueNoExists(&'static str),
}

impl From<heed::Error> for Error {
    fn from(e: heed::Error) -> Self {
        Error::Database(e.to_string())
    }
}

/// Build the `Data` error every decoder raises on a short read, naming the
/// bucket and the expected vs actual length.
pub(crate) fn short_read(bucket: &str, what: &str, expected: usize, actual: usize) -> Error {
    Error::Data(format!(
        "{bucket}: short read for {what} (expected {expected} bytes, read {actual})"
    ))
}

/// As [`short_read`], for keys.
pub(crate) fn short_key(bucket: &str, what: &str, expected: usize, actual: usize) -> Error {
    Error::Data(format!(
        "{bucket}: short key for {what} (expected {expected} bytes, read {actual})"
    ))
}
