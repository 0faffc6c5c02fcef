use thiserror::Error;

/// A call that produced no usable HTTP response.
///
/// Operation clients turn these into failed samples; they never abort a run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request could not be built: {0}")]
    Request(String),

    /// The target answered, but not with a result the caller can use.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Request(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
