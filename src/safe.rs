//! `SafeContext`: the lock-serialized decorator around any [`Context`].
//!
//! Every operation acquires one exclusive mutex, forwards to the wrapped
//! delegate with arguments unchanged, and returns whatever the delegate
//! returns. The guard is dropped on every path, error returns included, so
//! the lock can never leak. No result is cached, transformed or retried.
//!
//! The whole operation set is exposed on `&self`, so any number of concurrent
//! tasks may share one instance (by reference or `Arc`) and call mutating
//! operations; the mutex is what makes that sound. `SafeContext` also
//! implements [`Context`] itself, so it satisfies the same capability as the
//! thing it wraps and can travel through stages typed on the trait, or be
//! wrapped again.
//!
//! Calling back into the same instance from inside a delegated operation
//! (e.g. from a validator or error handler reached through the delegate)
//! deadlocks. That is a programming error, not a handled condition.

use crate::app::App;
use crate::context::{Context, Stored};
use crate::error::HttpError;
use crate::pipeline::Handler;
use crate::transport::{Cookie, FilePart, HttpRequest, HttpResponse, MultipartForm};
use http::StatusCode;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::Span;

pub struct SafeContext {
    mu: Mutex<Box<dyn Context>>,
}

impl SafeContext {
    /// Wrap a delegate. The delegate is owned exclusively for the lifetime of
    /// the wrapper; it is never accessible without the lock held.
    pub fn new(delegate: Box<dyn Context>) -> Self {
        Self {
            mu: Mutex::new(delegate),
        }
    }

    /// Convenience for concrete delegates.
    pub fn wrap(delegate: impl Context) -> Self {
        Self::new(Box::new(delegate))
    }

    /// Unwrap, returning the delegate.
    pub fn into_inner(self) -> Box<dyn Context> {
        self.mu.into_inner()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Context>> {
        self.mu.lock()
    }

    /// Snapshot of the current request.
    pub fn request(&self) -> HttpRequest {
        self.lock().request()
    }

    /// Replace the current request.
    pub fn set_request(&self, req: HttpRequest) {
        self.lock().set_request(req)
    }

    /// Snapshot of the accumulated response.
    pub fn response(&self) -> HttpResponse {
        self.lock().response()
    }

    /// Replace the accumulated response.
    pub fn set_response(&self, res: HttpResponse) {
        self.lock().set_response(res)
    }

    /// True when the connection is TLS.
    pub fn is_tls(&self) -> bool {
        self.lock().is_tls()
    }

    /// True when the request asks for a websocket upgrade.
    pub fn is_websocket(&self) -> bool {
        self.lock().is_websocket()
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> String {
        self.lock().scheme()
    }

    /// Client network address.
    pub fn real_ip(&self) -> String {
        self.lock().real_ip()
    }

    /// The registered route pattern for the matched handler.
    pub fn path(&self) -> String {
        self.lock().path()
    }

    pub fn set_path(&self, path: &str) {
        self.lock().set_path(path)
    }

    /// Path parameter by name.
    pub fn param(&self, name: &str) -> Option<String> {
        self.lock().param(name)
    }

    pub fn param_names(&self) -> Vec<String> {
        self.lock().param_names()
    }

    pub fn set_param_names(&self, names: Vec<String>) {
        self.lock().set_param_names(names)
    }

    pub fn param_values(&self) -> Vec<String> {
        self.lock().param_values()
    }

    pub fn set_param_values(&self, values: Vec<String>) {
        self.lock().set_param_values(values)
    }

    /// Query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.lock().query_param(name)
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        self.lock().query_params()
    }

    pub fn query_string(&self) -> String {
        self.lock().query_string()
    }

    /// Form field value by name.
    pub fn form_value(&self, name: &str) -> Option<String> {
        self.lock().form_value(name)
    }

    pub fn form_params(&self) -> Result<Vec<(String, String)>, HttpError> {
        self.lock().form_params()
    }

    /// Multipart file by form field name.
    pub fn form_file(&self, name: &str) -> Result<FilePart, HttpError> {
        self.lock().form_file(name)
    }

    pub fn multipart_form(&self) -> Result<MultipartForm, HttpError> {
        self.lock().multipart_form()
    }

    /// Named request cookie.
    pub fn cookie(&self, name: &str) -> Result<Cookie, HttpError> {
        self.lock().cookie(name)
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.lock().cookies()
    }

    /// Add a `Set-Cookie` header to the response.
    pub fn set_cookie(&self, cookie: Cookie) {
        self.lock().set_cookie(cookie)
    }

    /// Retrieve data from the per-request store.
    pub fn get(&self, key: &str) -> Option<Stored> {
        self.lock().get(key)
    }

    /// Save data in the per-request store.
    pub fn set(&self, key: &str, value: Stored) {
        self.lock().set(key, value)
    }

    /// Store a typed value under `key`.
    pub fn set_value<T: Send + Sync + 'static>(&self, key: &str, value: T) {
        self.set(key, Arc::new(value))
    }

    /// Fetch the value under `key`, downcast to `T`.
    pub fn get_as<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|stored| stored.downcast::<T>().ok())
    }

    /// Decode the request payload per method and content type.
    pub fn bind_value(&self) -> Result<Value, HttpError> {
        self.lock().bind_value()
    }

    /// Bind the request payload into `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let value = self.bind_value()?;
        serde_json::from_value(value).map_err(|e| HttpError::Bind(e.to_string()))
    }

    /// Validate `value` with the app-registered validator.
    pub fn validate(&self, value: &Value) -> Result<(), HttpError> {
        self.lock().validate(value)
    }

    /// Send a plain-text response.
    pub fn string(&self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        self.lock().string(code, body)
    }

    /// Send an HTML response.
    pub fn html(&self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        self.lock().html(code, body)
    }

    pub fn html_blob(&self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.lock().html_blob(code, body)
    }

    /// Send a JSON response.
    pub fn json<T: Serialize>(&self, code: StatusCode, body: &T) -> Result<(), HttpError> {
        let value = serde_json::to_value(body)?;
        self.json_value(code, &value)
    }

    pub fn json_value(&self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        self.lock().json_value(code, value)
    }

    /// Send pretty-printed JSON.
    pub fn json_pretty(
        &self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        self.lock().json_pretty(code, value, indent)
    }

    pub fn json_blob(&self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.lock().json_blob(code, body)
    }

    /// Send a JSONP response wrapped in `callback`.
    pub fn jsonp(&self, code: StatusCode, callback: &str, value: &Value) -> Result<(), HttpError> {
        self.lock().jsonp(code, callback, value)
    }

    pub fn jsonp_blob(
        &self,
        code: StatusCode,
        callback: &str,
        body: &[u8],
    ) -> Result<(), HttpError> {
        self.lock().jsonp_blob(code, callback, body)
    }

    /// Send an XML response.
    pub fn xml<T: Serialize>(&self, code: StatusCode, body: &T) -> Result<(), HttpError> {
        let value = serde_json::to_value(body)?;
        self.xml_value(code, &value)
    }

    pub fn xml_value(&self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        self.lock().xml_value(code, value)
    }

    /// Send pretty-printed XML.
    pub fn xml_pretty(
        &self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        self.lock().xml_pretty(code, value, indent)
    }

    pub fn xml_blob(&self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.lock().xml_blob(code, body)
    }

    /// Send a binary response with an explicit content type.
    pub fn blob(&self, code: StatusCode, content_type: &str, body: &[u8]) -> Result<(), HttpError> {
        self.lock().blob(code, content_type, body)
    }

    /// Drain `reader` into the response body.
    pub fn stream(
        &self,
        code: StatusCode,
        content_type: &str,
        reader: &mut dyn Read,
    ) -> Result<(), HttpError> {
        self.lock().stream(code, content_type, reader)
    }

    /// Respond with the content of the file at `path`.
    pub fn file(&self, path: &Path) -> Result<(), HttpError> {
        self.lock().file(path)
    }

    /// Respond with a file as a download prompt.
    pub fn attachment(&self, path: &Path, name: &str) -> Result<(), HttpError> {
        self.lock().attachment(path, name)
    }

    /// Respond with a file rendered inline.
    pub fn inline(&self, path: &Path, name: &str) -> Result<(), HttpError> {
        self.lock().inline(path, name)
    }

    /// Send a bodiless response.
    pub fn no_content(&self, code: StatusCode) -> Result<(), HttpError> {
        self.lock().no_content(code)
    }

    /// Redirect to `url` with a 3xx status code.
    pub fn redirect(&self, code: StatusCode, url: &str) -> Result<(), HttpError> {
        self.lock().redirect(code, url)
    }

    /// Render a template through the app-registered renderer.
    pub fn render(&self, code: StatusCode, template: &str, data: &Value) -> Result<(), HttpError> {
        self.lock().render(code, template, data)
    }

    /// Report `err` to the central error handler.
    pub fn error(&self, err: HttpError) {
        self.lock().error(err)
    }

    /// The handler matched by the router.
    pub fn handler(&self) -> Handler {
        self.lock().handler()
    }

    pub fn set_handler(&self, handler: Handler) {
        self.lock().set_handler(handler)
    }

    /// Per-request logger span.
    pub fn span(&self) -> Span {
        self.lock().span()
    }

    pub fn set_span(&self, span: Span) {
        self.lock().set_span(span)
    }

    /// Handle to the owning framework instance.
    pub fn app(&self) -> Arc<App> {
        self.lock().app()
    }

    /// Rebind the delegate to a new transport pair.
    pub fn reset(&self, req: HttpRequest, res: HttpResponse) {
        self.lock().reset(req, res)
    }
}

impl std::fmt::Debug for SafeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeContext").finish_non_exhaustive()
    }
}

/// `SafeContext` satisfies the same capability as its delegate, so it can be
/// substituted anywhere a [`Context`] is expected.
impl Context for SafeContext {
    fn request(&self) -> HttpRequest {
        SafeContext::request(self)
    }

    fn set_request(&mut self, req: HttpRequest) {
        SafeContext::set_request(self, req)
    }

    fn response(&self) -> HttpResponse {
        SafeContext::response(self)
    }

    fn set_response(&mut self, res: HttpResponse) {
        SafeContext::set_response(self, res)
    }

    fn is_tls(&self) -> bool {
        SafeContext::is_tls(self)
    }

    fn is_websocket(&self) -> bool {
        SafeContext::is_websocket(self)
    }

    fn scheme(&self) -> String {
        SafeContext::scheme(self)
    }

    fn real_ip(&self) -> String {
        SafeContext::real_ip(self)
    }

    fn path(&self) -> String {
        SafeContext::path(self)
    }

    fn set_path(&mut self, path: &str) {
        SafeContext::set_path(self, path)
    }

    fn param(&self, name: &str) -> Option<String> {
        SafeContext::param(self, name)
    }

    fn param_names(&self) -> Vec<String> {
        SafeContext::param_names(self)
    }

    fn set_param_names(&mut self, names: Vec<String>) {
        SafeContext::set_param_names(self, names)
    }

    fn param_values(&self) -> Vec<String> {
        SafeContext::param_values(self)
    }

    fn set_param_values(&mut self, values: Vec<String>) {
        SafeContext::set_param_values(self, values)
    }

    fn query_param(&self, name: &str) -> Option<String> {
        SafeContext::query_param(self, name)
    }

    fn query_params(&self) -> Vec<(String, String)> {
        SafeContext::query_params(self)
    }

    fn query_string(&self) -> String {
        SafeContext::query_string(self)
    }

    fn form_value(&self, name: &str) -> Option<String> {
        SafeContext::form_value(self, name)
    }

    fn form_params(&self) -> Result<Vec<(String, String)>, HttpError> {
        SafeContext::form_params(self)
    }

    fn form_file(&self, name: &str) -> Result<FilePart, HttpError> {
        SafeContext::form_file(self, name)
    }

    fn multipart_form(&self) -> Result<MultipartForm, HttpError> {
        SafeContext::multipart_form(self)
    }

    fn cookie(&self, name: &str) -> Result<Cookie, HttpError> {
        SafeContext::cookie(self, name)
    }

    fn cookies(&self) -> Vec<Cookie> {
        SafeContext::cookies(self)
    }

    fn set_cookie(&mut self, cookie: Cookie) {
        SafeContext::set_cookie(self, cookie)
    }

    fn get(&self, key: &str) -> Option<Stored> {
        SafeContext::get(self, key)
    }

    fn set(&mut self, key: &str, value: Stored) {
        SafeContext::set(self, key, value)
    }

    fn bind_value(&self) -> Result<Value, HttpError> {
        SafeContext::bind_value(self)
    }

    fn validate(&self, value: &Value) -> Result<(), HttpError> {
        SafeContext::validate(self, value)
    }

    fn string(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        SafeContext::string(self, code, body)
    }

    fn html(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        SafeContext::html(self, code, body)
    }

    fn html_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        SafeContext::html_blob(self, code, body)
    }

    fn json_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        SafeContext::json_value(self, code, value)
    }

    fn json_pretty(
        &mut self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        SafeContext::json_pretty(self, code, value, indent)
    }

    fn json_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        SafeContext::json_blob(self, code, body)
    }

    fn jsonp(&mut self, code: StatusCode, callback: &str, value: &Value) -> Result<(), HttpError> {
        SafeContext::jsonp(self, code, callback, value)
    }

    fn jsonp_blob(
        &mut self,
        code: StatusCode,
        callback: &str,
        body: &[u8],
    ) -> Result<(), HttpError> {
        SafeContext::jsonp_blob(self, code, callback, body)
    }

    fn xml_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        SafeContext::xml_value(self, code, value)
    }

    fn xml_pretty(
        &mut self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        SafeContext::xml_pretty(self, code, value, indent)
    }

    fn xml_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        SafeContext::xml_blob(self, code, body)
    }

    fn blob(&mut self, code: StatusCode, content_type: &str, body: &[u8]) -> Result<(), HttpError> {
        SafeContext::blob(self, code, content_type, body)
    }

    fn stream(
        &mut self,
        code: StatusCode,
        content_type: &str,
        reader: &mut dyn Read,
    ) -> Result<(), HttpError> {
        SafeContext::stream(self, code, content_type, reader)
    }

    fn file(&mut self, path: &Path) -> Result<(), HttpError> {
        SafeContext::file(self, path)
    }

    fn attachment(&mut self, path: &Path, name: &str) -> Result<(), HttpError> {
        SafeContext::attachment(self, path, name)
    }

    fn inline(&mut self, path: &Path, name: &str) -> Result<(), HttpError> {
        SafeContext::inline(self, path, name)
    }

    fn no_content(&mut self, code: StatusCode) -> Result<(), HttpError> {
        SafeContext::no_content(self, code)
    }

    fn redirect(&mut self, code: StatusCode, url: &str) -> Result<(), HttpError> {
        SafeContext::redirect(self, code, url)
    }

    fn render(&mut self, code: StatusCode, template: &str, data: &Value) -> Result<(), HttpError> {
        SafeContext::render(self, code, template, data)
    }

    fn error(&mut self, err: HttpError) {
        SafeContext::error(self, err)
    }

    fn handler(&self) -> Handler {
        SafeContext::handler(self)
    }

    fn set_handler(&mut self, handler: Handler) {
        SafeContext::set_handler(self, handler)
    }

    fn span(&self) -> Span {
        SafeContext::span(self)
    }

    fn set_span(&mut self, span: Span) {
        SafeContext::set_span(self, span)
    }

    fn app(&self) -> Arc<App> {
        SafeContext::app(self)
    }

    fn reset(&mut self, req: HttpRequest, res: HttpResponse) {
        SafeContext::reset(self, req, res)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Validator;
    use crate::native::HttpContext;
    use http::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn native(uri: &str) -> HttpContext {
        HttpContext::new(
            Arc::new(App::new()),
            HttpRequest::new(Method::GET, uri.parse().unwrap()),
        )
    }

    #[test]
    fn test_pass_through_equivalence() {
        let mut direct = native("/users/7?q=rust");
        direct.set_param_names(vec!["id".into()]);
        direct.set_param_values(vec!["7".into()]);

        let wrapped = SafeContext::wrap(native("/users/7?q=rust"));
        wrapped.set_param_names(vec!["id".into()]);
        wrapped.set_param_values(vec!["7".into()]);

        assert_eq!(Context::param(&direct, "id"), wrapped.param("id"));
        assert_eq!(Context::query_param(&direct, "q"), wrapped.query_param("q"));
        assert_eq!(Context::scheme(&direct), wrapped.scheme());
        assert_eq!(Context::bind_value(&direct).unwrap(), wrapped.bind_value().unwrap());

        Context::string(&mut direct, StatusCode::OK, "hi").unwrap();
        wrapped.string(StatusCode::OK, "hi").unwrap();
        let (a, b) = (Context::response(&direct), wrapped.response());
        assert_eq!(a.status, b.status);
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.body, b.body);
        assert_eq!(a.committed, b.committed);
    }

    #[test]
    fn test_errors_pass_through_unchanged() {
        let wrapped = SafeContext::wrap(native("/"));
        assert!(matches!(
            wrapped.cookie("missing").unwrap_err(),
            HttpError::CookieNotFound(_)
        ));
        assert!(matches!(
            wrapped.form_file("doc").unwrap_err(),
            HttpError::NoMultipartForm
        ));
        assert!(matches!(
            wrapped.redirect(StatusCode::OK, "/x").unwrap_err(),
            HttpError::InvalidRedirectCode(_)
        ));
    }

    #[test]
    fn test_reset_rebinds_transport_pair() {
        let wrapped = SafeContext::wrap(native("/old"));
        wrapped.set_value("k", 1i32);

        wrapped.reset(
            HttpRequest::new(Method::POST, "/new".parse().unwrap()),
            HttpResponse::default(),
        );

        assert_eq!(wrapped.request().method, Method::POST);
        assert_eq!(wrapped.request().uri.path(), "/new");
        assert!(wrapped.get("k").is_none());
    }

    #[test]
    fn test_wrapper_satisfies_capability_and_rewraps() {
        let inner = SafeContext::wrap(native("/"));
        let outer = SafeContext::new(Box::new(inner));

        outer.set_value("depth", 2u8);
        assert_eq!(*outer.get_as::<u8>("depth").unwrap(), 2);
        assert!(outer.as_any().downcast_ref::<SafeContext>().is_some());

        let delegate = outer.into_inner();
        assert!(delegate.as_any().downcast_ref::<SafeContext>().is_some());
        assert!(delegate.get("depth").is_some());
    }

    /// Observation point inside delegated calls: trips `overlap` if two
    /// delegated operations ever execute at the same time.
    struct Gate {
        in_flight: AtomicUsize,
        overlap: AtomicBool,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                overlap: AtomicBool::new(false),
            })
        }

        fn pass(&self) {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlap.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_micros(50));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct GatedValidator(Arc<Gate>);

    impl Validator for GatedValidator {
        fn validate(&self, _value: &Value) -> Result<(), HttpError> {
            self.0.pass();
            Ok(())
        }
    }

    struct GatedReader(Arc<Gate>);

    impl Read for GatedReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.pass();
            Ok(0)
        }
    }

    #[test]
    fn test_mutual_exclusion_across_operations() {
        let gate = Gate::new();
        let app = Arc::new(App::new().with_validator(GatedValidator(gate.clone())));
        let ctx = Arc::new(SafeContext::wrap(HttpContext::new(
            app,
            HttpRequest::default(),
        )));

        let mut threads = Vec::new();
        for i in 0..8 {
            let ctx = ctx.clone();
            let gate = gate.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        ctx.validate(&json!({})).unwrap();
                    } else {
                        let mut reader = GatedReader(gate.clone());
                        ctx.stream(StatusCode::OK, "text/plain", &mut reader).unwrap();
                    }
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert!(
            !gate.overlap.load(Ordering::SeqCst),
            "two delegated operations overlapped"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_store_traffic() {
        let ctx = Arc::new(SafeContext::wrap(native("/")));
        ctx.set_value("x", 0i64);

        let writer = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for i in 0..1000i64 {
                    ctx.set_value("x", i);
                }
            })
        };
        let reader = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for _ in 0..1000 {
                    let v = ctx.get_as::<i64>("x").expect("x always present");
                    assert!((0..1000).contains(&*v), "torn or unknown value: {v}");
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();

        // Unrelated keys written concurrently never disturb each other.
        let others = (0..4)
            .map(|n| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let key = format!("k{n}");
                    for i in 0..250u32 {
                        ctx.set_value(&key, i);
                        assert_eq!(*ctx.get_as::<u32>(&key).unwrap(), i);
                    }
                })
            })
            .collect::<Vec<_>>();
        for task in others {
            task.await.unwrap();
        }
    }
}
