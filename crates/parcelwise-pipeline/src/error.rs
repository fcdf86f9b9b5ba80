use parcelwise_core::ConfigError;
use parcelwise_service::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request's cancellation token fired. Not a failure; never shown to users.
    #[error("resolution cancelled")]
    Cancelled,

    /// A newer request started while this one was in flight.
    #[error("request {seq} superseded by request {current}")]
    Superseded { seq: u64, current: u64 },

    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigError),

    /// The parcel query failed. Fatal to the resolution.
    #[error("query failed: {message}")]
    QueryFailed { message: String },
}

impl PipelineError {
    /// True when the resolution was aborted rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Superseded { .. })
    }

    /// The single message to surface to the user, or `None` for aborted
    /// resolutions, which are silent.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Cancelled | Self::Superseded { .. } => None,
            Self::Validation(err) => Some(err.to_string()),
            Self::QueryFailed { message } => Some(format!("Query failed: {message}")),
        }
    }
}

impl From<ServiceError> for PipelineError {
    fn from(err: ServiceError) -> Self {
        if err.is_cancellation() {
            Self::Cancelled
        } else {
            Self::QueryFailed {
                message: err.user_message(),
            }
        }
    }
}
