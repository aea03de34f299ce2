use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No tier of the lookup cascade could produce a value for this key.
    #[error("cannot find or compute {0}")]
    KeyResolution(String),

    /// A region selector that isn't three index-or-bounded-range elements, or that can't be
    /// applied to the current region.
    #[error("malformed region selector: {0}")]
    MalformedSelector(String),

    #[error("shape mismatch for {key}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("index {index} is out of range for {key} with length {len}")]
    IndexOutOfRange {
        key: String,
        index: usize,
        len: usize,
    },

    #[error("missing parameter: {0}")]
    MissingParam(String),

    #[error("bad value for parameter {name}: {message}")]
    BadParam { name: String, message: String },

    #[error("unknown analysis: {0}")]
    UnknownAnalysis(String),

    #[error("units have already been set for this dump")]
    UnitsAlreadySet,

    /// The file isn't in a format we know how to read.
    #[error("bad file format: {0}")]
    Format(String),

    #[error(transparent)]
    IO(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn bad_param(name: &str, message: impl Into<String>) -> Self {
        Self::BadParam {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn shape_mismatch(key: &str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            key: key.to_string(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
