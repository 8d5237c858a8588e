use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("authorization required")]
    AuthRequired,
    #[error("invalid location: {0}")]
    Location(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("google client_id is not configured")]
    NotConfigured,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid authorization url: {0}")]
    Url(#[from] url::ParseError),
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("state mismatch on redirect")]
    StateMismatch,
    #[error("authorization timed out")]
    TimedOut,
    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    Authorize,
    LookoutFolder,
    ShutdownsFolder,
    CreateDocument,
    InsertText,
    SendMail,
}

impl ShutdownStep {
    pub fn label(&self) -> &'static str {
        match self {
            ShutdownStep::Authorize => "authorize",
            ShutdownStep::LookoutFolder => "lookout folder",
            ShutdownStep::ShutdownsFolder => "shutdowns folder",
            ShutdownStep::CreateDocument => "create document",
            ShutdownStep::InsertText => "insert text",
            ShutdownStep::SendMail => "send mail",
        }
    }
}

#[derive(Debug, Error)]
#[error("shutdown stopped at {}: {source}", .step.label())]
pub struct ShutdownError {
    pub step: ShutdownStep,
    #[source]
    pub source: FetchError,
}

impl ShutdownError {
    pub fn new(step: ShutdownStep, source: FetchError) -> Self {
        ShutdownError { step, source }
    }
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location label is empty")]
    EmptyLabel,
    #[error("coordinates out of range: {lat}, {lon}")]
    OutOfRange { lat: f64, lon: f64 },
    #[error("unknown time zone {0:?}")]
    UnknownZone(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
