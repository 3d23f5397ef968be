//! Handler chain the context flows through.
//!
//! Stages are `Arc`'d closures returning boxed futures; middleware wraps the
//! next stage and returns a new one. The context travels by value, so each
//! stage decides what the downstream stages see, which is exactly the hook
//! [`crate::middleware::serialize_context`] uses to substitute the wrapper.

use crate::context::Context;
use crate::error::HttpError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The context as it travels the chain: any capability implementation.
pub type BoxedContext = Box<dyn Context>;

/// One pipeline stage.
pub type Handler = Arc<dyn Fn(BoxedContext) -> BoxFuture<Result<(), HttpError>> + Send + Sync>;

/// A stage adapter: receives the next stage, returns the wrapped stage.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Lift an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(BoxedContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HttpError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Lift a closure into a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fold a middleware stack around a terminal handler. The first middleware in
/// the slice is the outermost stage, matching registration order.
pub fn compose(stack: &[Middleware], terminal: Handler) -> Handler {
    stack.iter().rev().fold(terminal, |next, mw| mw(next))
}
