use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown message packet type {0:?}")]
    UnknownMessageType(char),
    #[error("malformed attachment count")]
    BadAttachments,
    #[error("correlation id out of range")]
    BadCorrelationId,
    #[error("frame too large: {0}")]
    FrameTooLarge(usize),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid event envelope: {0}")]
    InvalidEvent(&'static str),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("field `{field}` is not {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },
}
