use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Unknown media type: {0}")]
    UnknownMediaType(String),

    #[error("Document is not an object")]
    NotAnObject,

    #[error("Document decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
