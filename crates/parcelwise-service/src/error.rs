use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller's cancellation token fired. Expected control flow, not a failure.
    #[error("request cancelled")]
    Cancelled,

    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {code}: {message}")]
    Server { code: i64, message: String },

    #[cfg(feature = "http")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("layer handle for {0} was closed")]
    Closed(String),
}

impl ServiceError {
    /// True for the cancellation signal, which callers must not report as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(ServiceError::Cancelled.is_cancellation());
        assert!(!ServiceError::Decode("x".into()).is_cancellation());
        assert!(
            !ServiceError::Server {
                code: 500,
                message: "boom".into()
            }
            .is_cancellation()
        );
    }

    #[test]
    fn server_message_extracted() {
        let err = ServiceError::Server {
            code: 400,
            message: "Invalid query parameters".into(),
        };
        assert_eq!(err.user_message(), "Invalid query parameters");

        let empty = ServiceError::Server {
            code: 502,
            message: String::new(),
        };
        assert_eq!(empty.user_message(), "service returned 502: ");
    }
}
