//! Error type shared by every component in libsuggest-core.
//!
//! Most public operations never surface these: sources that fail are logged and
//! contribute nothing. They are returned from loaders, persistence and the
//! fallible `try_*` source queries used by the fusion layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Reference data (lexicon, templates, phrases) could not be interpreted.
    #[error("malformed reference data: {0}")]
    ReferenceData(String),

    /// A persisted binary blob failed to decode.
    #[error("failed to decode persisted `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: bincode::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to build lexicon index: {0}")]
    Fst(#[from] fst::Error),

    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to write configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// A component lock was poisoned by a panicking writer.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! storage_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Error::Storage(err.into())
                }
            }
        )*
    };
}

storage_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
