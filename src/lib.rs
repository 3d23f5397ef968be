//! Lock-serialized access to a per-request context.
//!
//! Handlers that fan a request out to concurrent tasks cannot safely share
//! the framework's native context. [`SafeContext`] decorates any [`Context`]
//! implementation with one exclusive lock around every operation, and
//! [`serialize_context`] installs the decorator into the handler pipeline so
//! everything downstream observes only the wrapper.
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnstile::prelude::*;
//!
//! # fn demo() {
//! let chain = compose(
//!     &[serialize_context()],
//!     handler(|ctx| async move {
//!         let ctx = ctx.as_any().downcast_ref::<SafeContext>().unwrap();
//!         ctx.set_value("request_id", 7u64);
//!         ctx.string(http::StatusCode::OK, "ok")
//!     }),
//! );
//! # drop(chain);
//! # }
//! ```

pub mod app;
pub mod context;
pub mod error;
pub mod middleware;
pub mod native;
pub mod pipeline;
pub mod safe;
pub mod transport;

pub use app::App;
pub use context::{Context, ContextExt, Stored};
pub use error::HttpError;
pub use middleware::serialize_context;
pub use native::HttpContext;
pub use safe::SafeContext;

pub mod prelude {
    pub use crate::app::App;
    pub use crate::context::{Context, ContextExt, Stored};
    pub use crate::error::HttpError;
    pub use crate::middleware::serialize_context;
    pub use crate::native::HttpContext;
    pub use crate::pipeline::{compose, handler, middleware, BoxedContext, Handler, Middleware};
    pub use crate::safe::SafeContext;
    pub use crate::transport::{Cookie, FilePart, HttpRequest, HttpResponse, MultipartForm};

    // Transport vocabulary users will need alongside the context.
    pub use bytes::Bytes;
    pub use http::{Method, StatusCode, Uri};
}
