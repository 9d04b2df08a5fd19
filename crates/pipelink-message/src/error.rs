/// Errors raised while encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Text payload was not valid UTF-8.
    #[error("invalid UTF-8 text payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Object graph structure was invalid.
    #[error("object graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Structural problems in a reference-preserving object graph document.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node slot held something other than an object.
    #[error("expected a node object, found {found}")]
    ExpectedNode { found: &'static str },

    /// A node object carried neither `$id` nor `$ref`.
    #[error("node object has no \"$id\"")]
    MissingId,

    /// Two nodes claimed the same `$id`.
    #[error("duplicate node id {0:?}")]
    DuplicateId(String),

    /// A `$ref` pointed at an id that was never defined.
    #[error("reference to unknown node id {0:?}")]
    UnknownReference(String),

    /// A `$ref` resolved to a node of a different type.
    #[error("node {id:?} is not a {expected}")]
    TypeMismatch { id: String, expected: &'static str },

    /// A required field was absent.
    #[error("missing field {0:?}")]
    MissingField(String),

    /// A node wrote one of the reserved `$id`/`$ref` keys itself.
    #[error("field name {0:?} is reserved")]
    ReservedField(String),

    /// The document would nest deeper than a receiver can parse.
    #[error("object graph nests deeper than {max} levels")]
    TooDeep { max: usize },
}

pub type Result<T> = std::result::Result<T, MessageError>;
