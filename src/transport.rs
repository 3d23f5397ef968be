//! Owned transport values the context operates on.
//!
//! Accessors on the capability trait return clones of these, so no borrow of
//! the underlying context ever escapes the wrapper's lock. Bodies are buffered
//! `Bytes`, which makes the clones cheap.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::net::SocketAddr;

/// Snapshot of an incoming request as the framework hands it to the context.
///
/// Multipart payloads arrive pre-parsed in `multipart`; decoding the wire
/// format is the surrounding framework's job.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    pub tls: bool,
    pub multipart: Option<MultipartForm>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            tls: false,
            multipart: None,
        }
    }

    /// First value of a header, lossily decoded.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new(Method::GET, Uri::default())
    }
}

/// Accumulated response state. The transport flushes it once the handler
/// chain completes; `committed` marks that status and headers are final.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub committed: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            committed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Serialize as a `Set-Cookie` header value.
    pub fn encode(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }

    /// Parse a request `Cookie` header ("a=1; b=2") into its pairs.
    pub fn parse_header(raw: &str) -> Vec<Cookie> {
        raw.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                if name.is_empty() {
                    return None;
                }
                Some(Cookie::new(name, value))
            })
            .collect()
    }
}

/// One uploaded file of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Form field name the file was posted under.
    pub name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A multipart form, already decoded by the framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_encode() {
        let mut cookie = Cookie::new("session", "abc123");
        cookie.path = Some("/".into());
        cookie.max_age = Some(3600);
        cookie.http_only = true;
        assert_eq!(
            cookie.encode(),
            "session=abc123; Path=/; Max-Age=3600; HttpOnly"
        );
    }

    #[test]
    fn test_cookie_parse_header() {
        let cookies = Cookie::parse_header("a=1; b=2;  c=x=y");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[0], Cookie::new("a", "1"));
        assert_eq!(cookies[1], Cookie::new("b", "2"));
        // Value keeps everything after the first '='.
        assert_eq!(cookies[2], Cookie::new("c", "x=y"));
    }

    #[test]
    fn test_cookie_parse_skips_malformed_pairs() {
        let cookies = Cookie::parse_header("a=1; garbage; =nameless");
        assert_eq!(cookies, vec![Cookie::new("a", "1")]);
    }

    #[test]
    fn test_request_header_lookup() {
        let mut req = HttpRequest::default();
        req.headers
            .insert("x-real-ip", "10.0.0.1".parse().unwrap());
        assert_eq!(req.header("x-real-ip").as_deref(), Some("10.0.0.1"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_multipart_lookup() {
        let form = MultipartForm {
            fields: vec![("title".into(), "report".into())],
            files: vec![FilePart {
                name: "upload".into(),
                file_name: "report.pdf".into(),
                content_type: Some("application/pdf".into()),
                data: Bytes::from_static(b"%PDF"),
            }],
        };
        assert_eq!(form.value("title"), Some("report"));
        assert_eq!(form.file("upload").unwrap().file_name, "report.pdf");
        assert!(form.file("other").is_none());
    }
}
