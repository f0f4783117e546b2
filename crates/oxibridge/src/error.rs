//! Error types for the `oxibridge` runtime.
//!
//! Runtime operations that can fail (class registration, typed association
//! reads) report an [`Error`]. Exceptions raised through the trap are a
//! separate mechanism, see [`crate::runtime::exception`].

use std::fmt;

/// Errors that can occur in the `oxibridge` runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Class name already exists in registry.
    ClassAlreadyExists {
        /// The contested class name.
        name: String,
    },

    /// Class names must be non-empty.
    InvalidClassName,

    /// An association exists for the key but holds a different type.
    AssociatedTypeMismatch {
        /// Type name the caller asked for.
        expected: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassAlreadyExists { name } => {
                write!(f, "Class '{name}' already exists in registry")
            }
            Error::InvalidClassName => write!(f, "Class name must not be empty"),
            Error::AssociatedTypeMismatch { expected } => {
                write!(
                    f,
                    "Associated value is not of the requested type '{expected}'"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for `oxibridge` runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
