//! The owning-framework handle reachable from every context.
//!
//! `App` carries what the context operations forward to but do not own: the
//! central error handler, the optional payload validator and the optional
//! template renderer. Contexts hold it behind an `Arc`, one per framework
//! instance.

use crate::context::Context;
use crate::error::HttpError;
use crate::pipeline::{handler, Handler};
use http::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Central error handler: reports `err` on the given context, usually by
/// writing an error response.
pub type ErrorHandler = Arc<dyn Fn(&HttpError, &mut dyn Context) + Send + Sync>;

/// Payload validator, registered once on the [`App`] and reached through
/// `Context::validate`.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), HttpError>;
}

/// Template renderer behind `Context::render`. The engine itself lives
/// outside this crate.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<String, HttpError>;
}

pub struct App {
    error_handler: ErrorHandler,
    validator: Option<Box<dyn Validator>>,
    renderer: Option<Box<dyn Renderer>>,
}

impl App {
    pub fn new() -> Self {
        Self {
            error_handler: default_error_handler(),
            validator: None,
            renderer: None,
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn error_handler(&self) -> ErrorHandler {
        self.error_handler.clone()
    }

    pub fn validator(&self) -> Option<&dyn Validator> {
        self.validator.as_deref()
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.renderer.as_deref()
    }

    /// Handler a fresh or reset context starts with.
    pub fn not_found_handler() -> Handler {
        handler(|_ctx| async {
            Err(HttpError::status(StatusCode::NOT_FOUND, "Not Found"))
        })
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs the failure and writes `{"message": …}` with the error's status code,
/// unless the response is already committed.
fn default_error_handler() -> ErrorHandler {
    Arc::new(|err, ctx| {
        tracing::error!(error = %err, "request failed");
        if ctx.response().committed {
            return;
        }
        let body = serde_json::json!({ "message": err.to_string() });
        if let Err(write_err) = ctx.json_value(err.status_code(), &body) {
            tracing::error!(error = %write_err, "error handler could not write response");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HttpContext;
    use crate::transport::HttpRequest;

    struct RejectAll;

    impl Validator for RejectAll {
        fn validate(&self, _value: &Value) -> Result<(), HttpError> {
            Err(HttpError::Validation("rejected".into()))
        }
    }

    #[test]
    fn test_default_error_handler_writes_json_body() {
        let app = Arc::new(App::new());
        let mut ctx = HttpContext::new(app.clone(), HttpRequest::default());

        ctx.error(HttpError::status(StatusCode::NOT_FOUND, "Not Found"));

        let res = ctx.response();
        assert!(res.committed);
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&res.body).unwrap();
        assert_eq!(body["message"], "404 Not Found: Not Found");
    }

    #[test]
    fn test_error_handler_leaves_committed_response_alone() {
        let app = Arc::new(App::new());
        let mut ctx = HttpContext::new(app, HttpRequest::default());

        ctx.string(StatusCode::OK, "done").unwrap();
        ctx.error(HttpError::status(StatusCode::BAD_GATEWAY, "late"));

        let res = ctx.response();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(&res.body[..], b"done");
    }

    #[test]
    fn test_registered_validator_is_forwarded_to() {
        let app = Arc::new(App::new().with_validator(RejectAll));
        let ctx = HttpContext::new(app, HttpRequest::default());

        let err = ctx.validate(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, HttpError::Validation(_)));
    }

    #[test]
    fn test_validate_without_validator_fails() {
        let ctx = HttpContext::new(Arc::new(App::new()), HttpRequest::default());
        let err = ctx.validate(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, HttpError::NoValidator));
    }
}
