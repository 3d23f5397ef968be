//! `HttpContext`: the framework-native implementation of the capability.
//!
//! This is the delegate the safe wrapper serializes access to. It owns the
//! buffered transport pair, the routing metadata filled in by the router, and
//! the per-request store.

use crate::app::App;
use crate::context::{Context, Stored};
use crate::error::HttpError;
use crate::pipeline::Handler;
use crate::transport::{Cookie, FilePart, HttpRequest, HttpResponse, MultipartForm};
use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, UPGRADE};
use http::{HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::Span;

pub struct HttpContext {
    request: HttpRequest,
    response: HttpResponse,
    path: String,
    param_names: Vec<String>,
    param_values: Vec<String>,
    store: HashMap<String, Stored>,
    handler: Handler,
    span: Span,
    app: Arc<App>,
}

impl HttpContext {
    pub fn new(app: Arc<App>, request: HttpRequest) -> Self {
        let span = tracing::info_span!(
            "request",
            method = %request.method,
            uri = %request.uri,
        );
        Self {
            request,
            response: HttpResponse::default(),
            path: String::new(),
            param_names: Vec::new(),
            param_values: Vec::new(),
            store: HashMap::new(),
            handler: App::not_found_handler(),
            span,
            app,
        }
    }

    fn content_type(&self) -> String {
        self.request.header("content-type").unwrap_or_default()
    }

    /// Commit status, content type and body in one step. A second write on a
    /// committed response is dropped with a warning, mirroring the
    /// "superfluous response" behavior of a real transport.
    fn write(&mut self, code: StatusCode, content_type: &str, body: Bytes) -> Result<(), HttpError> {
        if self.response.committed {
            tracing::warn!(status = %code, "response already committed, dropping write");
            return Ok(());
        }
        self.response.status = code;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.response.headers.insert(CONTENT_TYPE, value);
        }
        self.response.body = body;
        self.response.committed = true;
        Ok(())
    }

    fn serve_file(&mut self, path: &Path) -> Result<(), HttpError> {
        let body = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HttpError::status(StatusCode::NOT_FOUND, "Not Found"),
            _ => HttpError::Io(e),
        })?;
        self.write(StatusCode::OK, content_type_for(path), Bytes::from(body))
    }

    fn disposition(&mut self, kind: &str, path: &Path, name: &str) -> Result<(), HttpError> {
        let value = format!("{kind}; filename=\"{name}\"");
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.response.headers.insert(CONTENT_DISPOSITION, value);
        }
        self.serve_file(path)
    }
}

impl Context for HttpContext {
    fn request(&self) -> HttpRequest {
        self.request.clone()
    }

    fn set_request(&mut self, req: HttpRequest) {
        self.request = req;
    }

    fn response(&self) -> HttpResponse {
        self.response.clone()
    }

    fn set_response(&mut self, res: HttpResponse) {
        self.response = res;
    }

    fn is_tls(&self) -> bool {
        self.request.tls
    }

    fn is_websocket(&self) -> bool {
        self.request
            .headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    fn scheme(&self) -> String {
        if self.request.tls {
            return "https".into();
        }
        self.request
            .header("x-forwarded-proto")
            .unwrap_or_else(|| "http".into())
    }

    fn real_ip(&self) -> String {
        if let Some(forwarded) = self.request.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_owned();
                }
            }
        }
        if let Some(ip) = self.request.header("x-real-ip") {
            return ip;
        }
        self.request
            .remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn set_path(&mut self, path: &str) {
        self.path = path.to_owned();
    }

    fn param(&self, name: &str) -> Option<String> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.param_values.get(i).cloned())
    }

    fn param_names(&self) -> Vec<String> {
        self.param_names.clone()
    }

    fn set_param_names(&mut self, names: Vec<String>) {
        self.param_names = names;
    }

    fn param_values(&self) -> Vec<String> {
        self.param_values.clone()
    }

    fn set_param_values(&mut self, values: Vec<String>) {
        self.param_values = values;
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn query_params(&self) -> Vec<(String, String)> {
        let query = self.request.uri.query().unwrap_or("");
        serde_urlencoded::from_str(query).unwrap_or_default()
    }

    fn query_string(&self) -> String {
        self.request.uri.query().unwrap_or("").to_owned()
    }

    fn form_value(&self, name: &str) -> Option<String> {
        self.form_params()
            .ok()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn form_params(&self) -> Result<Vec<(String, String)>, HttpError> {
        if self
            .content_type()
            .starts_with("application/x-www-form-urlencoded")
        {
            return serde_urlencoded::from_bytes(&self.request.body)
                .map_err(|e| HttpError::Bind(e.to_string()));
        }
        if let Some(form) = &self.request.multipart {
            return Ok(form.fields.clone());
        }
        Ok(Vec::new())
    }

    fn form_file(&self, name: &str) -> Result<FilePart, HttpError> {
        let form = self
            .request
            .multipart
            .as_ref()
            .ok_or(HttpError::NoMultipartForm)?;
        form.file(name)
            .cloned()
            .ok_or_else(|| HttpError::FileNotFound(name.to_owned()))
    }

    fn multipart_form(&self) -> Result<MultipartForm, HttpError> {
        self.request
            .multipart
            .clone()
            .ok_or(HttpError::NoMultipartForm)
    }

    fn cookie(&self, name: &str) -> Result<Cookie, HttpError> {
        self.cookies()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| HttpError::CookieNotFound(name.to_owned()))
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.request
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::parse_header)
            .collect()
    }

    fn set_cookie(&mut self, cookie: Cookie) {
        if let Ok(value) = HeaderValue::from_str(&cookie.encode()) {
            self.response.headers.append(SET_COOKIE, value);
        }
    }

    fn get(&self, key: &str) -> Option<Stored> {
        self.store.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Stored) {
        self.store.insert(key.to_owned(), value);
    }

    fn bind_value(&self) -> Result<Value, HttpError> {
        let method = &self.request.method;
        if *method == Method::GET || *method == Method::HEAD || *method == Method::DELETE {
            return Ok(pairs_to_object(self.query_params()));
        }
        let content_type = self.content_type();
        if content_type.starts_with("application/json") {
            return serde_json::from_slice(&self.request.body)
                .map_err(|e| HttpError::Bind(e.to_string()));
        }
        if content_type.starts_with("application/x-www-form-urlencoded")
            || self.request.multipart.is_some()
        {
            return Ok(pairs_to_object(self.form_params()?));
        }
        Err(HttpError::Bind(format!(
            "unsupported media type: {content_type:?}"
        )))
    }

    fn validate(&self, value: &Value) -> Result<(), HttpError> {
        self.app
            .validator()
            .ok_or(HttpError::NoValidator)?
            .validate(value)
    }

    fn string(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        self.write(
            code,
            "text/plain; charset=utf-8",
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    fn html(&mut self, code: StatusCode, body: &str) -> Result<(), HttpError> {
        self.html_blob(code, body.as_bytes())
    }

    fn html_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.write(
            code,
            "text/html; charset=utf-8",
            Bytes::copy_from_slice(body),
        )
    }

    fn json_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        let body = serde_json::to_vec(value)?;
        self.write(code, "application/json", Bytes::from(body))
    }

    fn json_pretty(
        &mut self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        self.write(code, "application/json", Bytes::from(buf))
    }

    fn json_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.write(code, "application/json", Bytes::copy_from_slice(body))
    }

    fn jsonp(&mut self, code: StatusCode, callback: &str, value: &Value) -> Result<(), HttpError> {
        let payload = serde_json::to_vec(value)?;
        self.jsonp_blob(code, callback, &payload)
    }

    fn jsonp_blob(
        &mut self,
        code: StatusCode,
        callback: &str,
        body: &[u8],
    ) -> Result<(), HttpError> {
        let mut payload = Vec::with_capacity(callback.len() + body.len() + 3);
        payload.extend_from_slice(callback.as_bytes());
        payload.push(b'(');
        payload.extend_from_slice(body);
        payload.extend_from_slice(b");");
        self.write(
            code,
            "application/javascript; charset=utf-8",
            Bytes::from(payload),
        )
    }

    fn xml_value(&mut self, code: StatusCode, value: &Value) -> Result<(), HttpError> {
        self.write(
            code,
            "application/xml; charset=utf-8",
            Bytes::from(render_xml(value, "")),
        )
    }

    fn xml_pretty(
        &mut self,
        code: StatusCode,
        value: &Value,
        indent: &str,
    ) -> Result<(), HttpError> {
        self.write(
            code,
            "application/xml; charset=utf-8",
            Bytes::from(render_xml(value, indent)),
        )
    }

    fn xml_blob(&mut self, code: StatusCode, body: &[u8]) -> Result<(), HttpError> {
        self.write(
            code,
            "application/xml; charset=utf-8",
            Bytes::copy_from_slice(body),
        )
    }

    fn blob(&mut self, code: StatusCode, content_type: &str, body: &[u8]) -> Result<(), HttpError> {
        self.write(code, content_type, Bytes::copy_from_slice(body))
    }

    fn stream(
        &mut self,
        code: StatusCode,
        content_type: &str,
        reader: &mut dyn Read,
    ) -> Result<(), HttpError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.write(code, content_type, Bytes::from(buf))
    }

    fn file(&mut self, path: &Path) -> Result<(), HttpError> {
        self.serve_file(path)
    }

    fn attachment(&mut self, path: &Path, name: &str) -> Result<(), HttpError> {
        self.disposition("attachment", path, name)
    }

    fn inline(&mut self, path: &Path, name: &str) -> Result<(), HttpError> {
        self.disposition("inline", path, name)
    }

    fn no_content(&mut self, code: StatusCode) -> Result<(), HttpError> {
        if self.response.committed {
            tracing::warn!(status = %code, "response already committed, dropping write");
            return Ok(());
        }
        self.response.status = code;
        self.response.body = Bytes::new();
        self.response.committed = true;
        Ok(())
    }

    fn redirect(&mut self, code: StatusCode, url: &str) -> Result<(), HttpError> {
        if !code.is_redirection() {
            return Err(HttpError::InvalidRedirectCode(code));
        }
        if self.response.committed {
            tracing::warn!(status = %code, "response already committed, dropping redirect");
            return Ok(());
        }
        if let Ok(value) = HeaderValue::from_str(url) {
            self.response.headers.insert(LOCATION, value);
        }
        self.response.status = code;
        self.response.committed = true;
        Ok(())
    }

    fn render(&mut self, code: StatusCode, template: &str, data: &Value) -> Result<(), HttpError> {
        let app = self.app.clone();
        let body = app
            .renderer()
            .ok_or(HttpError::NoRenderer)?
            .render(template, data)?;
        self.html(code, &body)
    }

    fn error(&mut self, err: HttpError) {
        let handler = self.app.error_handler();
        handler(&err, self);
    }

    fn handler(&self) -> Handler {
        self.handler.clone()
    }

    fn set_handler(&mut self, handler: Handler) {
        self.handler = handler;
    }

    fn span(&self) -> Span {
        self.span.clone()
    }

    fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    fn app(&self) -> Arc<App> {
        self.app.clone()
    }

    fn reset(&mut self, req: HttpRequest, res: HttpResponse) {
        self.request = req;
        self.response = res;
        self.path.clear();
        self.param_names.clear();
        self.param_values.clear();
        self.store.clear();
        self.handler = App::not_found_handler();
        self.span = Span::none();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn pairs_to_object(pairs: Vec<(String, String)>) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k, Value::String(v));
    }
    Value::Object(map)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn render_xml(value: &Value, indent: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    if !indent.is_empty() {
        out.push('\n');
    }
    encode_element("response", value, indent, 0, &mut out);
    out
}

fn encode_element(tag: &str, value: &Value, indent: &str, depth: usize, out: &mut String) {
    let pad = indent.repeat(depth);
    match value {
        Value::Null => {
            out.push_str(&pad);
            out.push_str(&format!("<{tag}/>"));
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str(&pad);
                out.push_str(&format!("<{tag}/>"));
                return;
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 && !indent.is_empty() {
                    out.push('\n');
                }
                encode_element(tag, item, indent, depth, out);
            }
        }
        Value::Object(map) => {
            out.push_str(&pad);
            out.push_str(&format!("<{tag}>"));
            for (key, child) in map {
                if !indent.is_empty() {
                    out.push('\n');
                }
                encode_element(key, child, indent, depth + 1, out);
            }
            if !indent.is_empty() {
                out.push('\n');
                out.push_str(&pad);
            }
            out.push_str(&format!("</{tag}>"));
        }
        Value::String(s) => {
            out.push_str(&pad);
            out.push_str(&format!("<{tag}>{}</{tag}>", xml_escape(s)));
        }
        other => {
            out.push_str(&pad);
            out.push_str(&format!("<{tag}>{other}</{tag}>"));
        }
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
