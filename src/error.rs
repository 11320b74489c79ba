use std::{collections::TryReserveError, io, path::PathBuf, string::FromUtf8Error};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open configuration file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: not valid UTF-8: {source}")]
    InvalidUtf8 {
        line: usize,
        #[source]
        source: FromUtf8Error,
    },

    #[error("line {line}: invalid key `{key}` in configuration file")]
    UnknownKey { line: usize, key: String },

    #[error("configuration file should provide at least one server")]
    MissingServer,

    #[error("configuration file should provide exactly {expected} `{key}` line, found {found}")]
    Cardinality {
        key: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("cannot allocate {table} table: {source}")]
    Allocation {
        table: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error("line {line}: malformed `{key}` entry: {reason}")]
    MalformedField {
        line: usize,
        key: &'static str,
        reason: String,
    },

    #[error("`{key}` weights sum to zero")]
    ZeroWeight { key: &'static str },
}
