//! Error types for aggregation descriptor handling.
//!
//! Only genuine failures are errors here. Adding a product that is already
//! registered, removing one that is absent and validating a cube with
//! missing files are reported through return values instead.

use std::io;
use std::path::PathBuf;

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

/// Result type for descriptor operations
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// Failures surfaced by [`crate::AggregationDescriptor`].
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The file exists but does not hold a usable NcML aggregation.
    #[error("malformed aggregation descriptor '{}'", path.display())]
    MalformedDescriptor {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The file exists but could not be read.
    #[error("failed to read aggregation descriptor '{}'", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `save` could not write the target location.
    #[error("failed to write aggregation descriptor '{}'", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A product location was rejected before touching the document.
    #[error("invalid product location '{location}': {reason}")]
    InvalidLocation {
        location: String,
        reason: &'static str,
    },
}

impl DescriptorError {
    /// Path of the descriptor involved, when the error concerns one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::MalformedDescriptor { path, .. }
            | Self::ReadFailure { path, .. }
            | Self::WriteFailure { path, .. } => Some(path),
            Self::InvalidLocation { .. } => None,
        }
    }
}

/// Reasons an NcML document could not be turned into the typed tree.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("descriptor is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("XML syntax error at byte {position}: {source}")]
    Syntax {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("invalid attribute: {0}")]
    Attribute(#[from] AttrError),

    #[error("invalid attribute value: {0}")]
    Value(#[source] quick_xml::Error),

    #[error("{0}")]
    Structure(String),
}

impl ParseError {
    pub(crate) fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }
}
