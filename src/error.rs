//! Error types for isomapper.

use thiserror::Error;

/// The main error type for mapper operations.
///
/// Every payload is a plain string so the error can be cloned into each
/// executor waiting on a shared table-ready gate and carried verbatim across
/// the remote transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapperError {
    /// The entity did not supply a table name.
    #[error("mapper should specify table name")]
    TableNameMissing,

    /// A replayed query failed the allow-list check.
    #[error("invalid query: {0}")]
    ValidationRejected(String),

    /// The remote peer failed to execute a forwarded query.
    #[error("remote execution error: {0}")]
    Remote(String),

    /// A pre- or post-query hook refused the query.
    #[error("hook rejected query: {0}")]
    Hook(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request/response channel broke down.
    #[error("transport error: {0}")]
    Transport(String),

    /// A query descriptor could not be built or read back.
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// A serialized function body could not be turned into a transform.
    #[error("cannot compile function: {0}")]
    Compile(String),

    /// No mapper is registered under the requested logical name.
    #[error("unknown mapper: '{0}'")]
    UnknownMapper(String),

    /// The operation needs a different execution context.
    #[error("operation requires {0} context")]
    UnsupportedContext(&'static str),

    /// Rows could not be shaped into the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

impl MapperError {
    /// Create a hook rejection.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Create a validation rejection for the given rendered query.
    pub fn rejected(rendered: impl Into<String>) -> Self {
        Self::ValidationRejected(rendered.into())
    }
}

impl From<std::io::Error> for MapperError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Result type alias for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MapperError::rejected("delete from \"items\"");
        assert_eq!(err.to_string(), "invalid query: delete from \"items\"");
        assert_eq!(
            MapperError::TableNameMissing.to_string(),
            "mapper should specify table name"
        );
    }
}
