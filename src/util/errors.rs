use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Concrete failure causes surfaced by reconcilers, clients and workers.
#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("wiki network error: {0}")]
    WikiNetwork(String),

    #[error("wiki auth error: {0}")]
    WikiAuth(String),

    #[error("wiki protocol error: {0}")]
    WikiProtocol(String),

    #[error("translation service error: {0}")]
    Translate(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("worker error: {0}")]
    Worker(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "json_serialization_error",
            StdError::KubeError(_) => "kube_error",
            StdError::FinalizerError(_) => "finalizer_error",
            StdError::MetadataMissing(_) => "metadata_missing",
            StdError::InvalidArgument(_) => "invalid_argument",
            StdError::WikiNetwork(_) => "wiki_network",
            StdError::WikiAuth(_) => "wiki_auth",
            StdError::WikiProtocol(_) => "wiki_protocol",
            StdError::Translate(_) => "translate",
            StdError::Validation(_) => "validation",
            StdError::Semantic(_) => "semantic",
            StdError::Worker(_) => "worker",
        }
        .to_string()
    }
}

/// A failure paired with the delay the caller should wait before retrying.
#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    pub fn requeue_after(error: StdError, duration: Duration) -> Error {
        Error::ErrorWithRequeue(ErrorWithRequeue::new(error, duration))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::KubeError(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
