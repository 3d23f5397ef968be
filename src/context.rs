//! The request-context capability.
//!
//! One trait covers the whole per-request operation set: transport access,
//! connection and routing metadata, query/form/cookie reads, the generic
//! key-value store, binding/validation hooks, the response-writer family,
//! error reporting, matched handler, logger span, the owning [`App`] handle
//! and `reset`. The framework-native [`crate::native::HttpContext`] and the
//! lock-serialized [`crate::safe::SafeContext`] both implement it.
//!
//! Read accessors take `&self` and return owned values; nothing borrowed from
//! the underlying state may escape, or the safe wrapper could not forward the
//! call from behind its lock. Mutators take `&mut self`.

use crate::app::App;
use crate::error::HttpError;
use crate::pipeline::Handler;
use crate::transport::{Cookie, FilePart, HttpRequest, HttpResponse, MultipartForm};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::Span;

/// A value in the per-request store: type-erased, downcast at the call site.
pub type Stored = Arc<dyn Any + Send + Sync>;

pub trait Context: Send + 'static {
    // ---- transport ----

    /// Snapshot of the current request.
    fn request(&self) -> HttpRequest;
    fn set_request(&mut self, req: HttpRequest);
    /// Snapshot of the accumulated response.
    fn response(&self) -> HttpResponse;
    fn set_response(&mut self, res: HttpResponse);

    // ---- connection metadata ----

    fn is_tls(&self) -> bool;
    /// True when the request asks for a websocket upgrade.
    fn is_websocket(&self) -> bool;
    /// `http` or `https`, honoring `X-Forwarded-Proto`.
    fn scheme(&self) -> String;
    /// Client address, honoring `X-Forwarded-For` and `X-Real-IP`.
    fn real_ip(&self) -> String;

    // ---- routing metadata ----

    /// The registered route pattern that matched, e.g. `/users/:id`.
    fn path(&self) -> String;
    fn set_path(&mut self, path: &str);
    fn param(&self, name: &str) -> Option<String>;
    fn param_names(&self) -> Vec<String>;
    fn set_param_names(&mut self, names: Vec<String>);
    fn param_values(&self) -> Vec<String>;
    fn set_param_values(&mut self, values: Vec<String>);

    // ---- query and form ----

    fn query_param(&self, name: &str) -> Option<String>;
    fn query_params(&self) -> Vec<(String, String)>;
    fn query_string(&self) -> String;
    fn form_value(&self, name: &str) -> Option<String>;
    fn form_params(&self) -> Result<Vec<(String, String)>, HttpError>;
    fn form_file(&self, name: &str) -> Result<FilePart, HttpError>;
    fn multipart_form(&self) -> Result<MultipartForm, HttpError>;

    // ---- cookies ----

    fn cookie(&self, name: &str) -> Result<Cookie, HttpError>;
    fn cookies(&self) -> Vec<Cookie>;
    fn set_cookie(&mut self, cookie: Cookie);

    // ---- per-request store ----

    fn get(&self, key: &str) -> Option<Stored>;
    fn set(&mut self, key: &str, value: Stored);

    // ---- binding and validation ----

    /// Decode the request payload into a `Value` based on method and
    /// content type. Typed decoding lives in [`ContextExt::bind`].
    fn bind_value(&self) -> Result<Value, HttpError>;
    /// Forward to the validator registered on the owning [`App`].
    fn validate(&self, value: &Value) -> Result<(), HttpError>;

    // ---- response writers ----

    fn string(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError>;
    fn html(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError>;
    fn html_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError>;
    fn json_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError>;
    fn json_pretty(&mut self, code: StatusCode, value: &Value, indent: &str)
        -> Result<(), HttpError>;
    fn json_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError>;
    fn jsonp(&mut self, code: StatusCode, callback: &str, value: &Value)
        -> Result<(), HttpError>;
    fn jsonp_blob(&mut self, code: StatusCode, callback: &str, body: &[u8])
        -> Result<(), HttpError>;
    fn xml_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError>;
    fn xml_pretty(&mut self, code: StatusCode, value: &Value, indent: &str)
        -> Result<(), HttpError>;
    fn xml_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError>;
    fn blob(&mut self, code: StatusCode, content_type: &str, body: &[u8])
        -> Result<(), HttpError>;
    /// Drain `reader` into the buffered response body.
    fn stream(
        &mut self,
        code: StatusCode,
        content_type: &str,
        reader: &mut dyn Read,
    ) -> Result<(), HttpError>;
    fn file(&mut self, path: &Path) -> Result<(), HttpError>;
    fn attachment(&mut self, path: &Path, name: &str) -> Result<(), HttpError>;
    fn inline(&mut self, path: &Path, name: &str) -> Result<(), HttpError>;
    fn no_content(&mut self, code: StatusCode) -> Result<(), HttpError>;
    fn redirect(&mut self, code: StatusCode, url: &str) -> Result<(), HttpError>;
    /// Forward to the renderer registered on the owning [`App`].
    fn render(&mut self, code: StatusCode, template: &str, data: &Value)
        -> Result<(), HttpError>;

    // ---- framework plumbing ----

    /// Report `err` to the central error handler of the owning [`App`].
    fn error(&mut self, err: HttpError);

    /// The handler matched by the router for this request.
    fn handler(&self) -> Handler;
    fn set_handler(&mut self, handler: Handler);

    /// Per-request logger span.
    fn span(&self) -> Span;
    fn set_span(&mut self, span: Span);

    fn app(&self) -> Arc<App>;

    /// Rebind to a fresh transport pair and clear per-request state, so the
    /// framework can recycle the context between requests.
    fn reset(&mut self, req: HttpRequest, res: HttpResponse);

    /// Concrete-type escape hatch; lets a pipeline stage recover the wrapper.
    fn as_any(&self) -> &dyn Any;
}

/// Typed conveniences layered over the object-safe operation set.
pub trait ContextExt: Context {
    /// Bind the request payload into `T`.
    fn bind<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let value = self.bind_value()?;
        serde_json::from_value(value).map_err(|e| HttpError::Bind(e.to_string()))
    }

    /// Send `body` as a JSON response.
    fn json<T: Serialize>(&mut self, code: StatusCode, body: &T) -> Result<(), HttpError> {
        let value = serde_json::to_value(body)?;
        self.json_value(code, &value)
    }

    /// Send `body` as an XML response.
    fn xml<T: Serialize>(&mut self, code: StatusCode, body: &T) -> Result<(), HttpError> {
        let value = serde_json::to_value(body)?;
        self.xml_value(code, &value)
    }

    /// Store a value under `key`.
    fn set_value<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.set(key, Arc::new(value));
    }

    /// Fetch the value under `key`, downcast to `T`.
    fn get_as<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|stored| stored.downcast::<T>().ok())
    }
}

impl<C: Context + ?Sized> ContextExt for C {}
