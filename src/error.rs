use http::StatusCode;
use thiserror::Error;

/// Error type shared by every fallible context operation.
///
/// The safe wrapper never produces these itself; they originate in the
/// delegate (binding, validation, missing data, I/O) and pass through
/// unchanged.
#[derive(Debug, Error)]
pub enum HttpError {
    /// A plain status-code error, e.g. the default not-found handler.
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("cookie not found: {0}")]
    CookieNotFound(String),

    #[error("multipart file not found: {0}")]
    FileNotFound(String),

    #[error("request carries no multipart form")]
    NoMultipartForm,

    #[error("bind: {0}")]
    Bind(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("no validator registered")]
    NoValidator,

    #[error("no renderer registered")]
    NoRenderer,

    #[error("render: {0}")]
    Render(String),

    #[error("invalid redirect status code: {0}")]
    InvalidRedirectCode(StatusCode),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        HttpError::Status {
            code,
            message: message.into(),
        }
    }

    /// The status code the central error handler reports for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::Status { code, .. } => *code,
            HttpError::CookieNotFound(_)
            | HttpError::FileNotFound(_)
            | HttpError::NoMultipartForm
            | HttpError::Bind(_)
            | HttpError::Validation(_) => StatusCode::BAD_REQUEST,
            HttpError::NoValidator
            | HttpError::NoRenderer
            | HttpError::Render(_)
            | HttpError::InvalidRedirectCode(_)
            | HttpError::Io(_)
            | HttpError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let err = HttpError::status(StatusCode::NOT_FOUND, "Not Found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        assert_eq!(
            HttpError::Bind("bad payload".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::NoRenderer.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_carries_message() {
        let err = HttpError::status(StatusCode::NOT_FOUND, "Not Found");
        assert!(err.to_string().contains("Not Found"));
    }
}
