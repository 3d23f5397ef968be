//! The installer stage: substitutes the lock-serialized wrapper for whatever
//! context the framework constructed, so every downstream stage (and every
//! task it fans out to) goes through the lock.

use crate::pipeline::{handler, middleware, Middleware};
use crate::safe::SafeContext;

/// Middleware that wraps the incoming context in a [`SafeContext`] and hands
/// the replacement to the next stage. Install it ahead of any handler that
/// processes the request on multiple tasks. Errors from the next stage
/// propagate unchanged.
pub fn serialize_context() -> Middleware {
    middleware(|next| {
        handler(move |ctx| {
            let next = next.clone();
            async move { next(Box::new(SafeContext::new(ctx))).await }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::context::Context;
    use crate::error::HttpError;
    use crate::native::HttpContext;
    use crate::pipeline::compose;
    use crate::transport::HttpRequest;
    use futures_util::future::join_all;
    use http::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn new_ctx() -> Box<dyn Context> {
        Box::new(HttpContext::new(
            Arc::new(App::new()),
            HttpRequest::default(),
        ))
    }

    #[tokio::test]
    async fn test_downstream_sees_the_wrapper() {
        let saw_wrapper = Arc::new(AtomicBool::new(false));
        let saw = saw_wrapper.clone();

        let terminal = handler(move |ctx| {
            let saw = saw.clone();
            async move {
                saw.store(
                    ctx.as_any().downcast_ref::<SafeContext>().is_some(),
                    Ordering::SeqCst,
                );
                Ok(())
            }
        });

        let chain = compose(&[serialize_context()], terminal);
        chain(new_ctx()).await.unwrap();
        assert!(saw_wrapper.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_next_stage_errors_propagate_unchanged() {
        let terminal = handler(|_ctx| async {
            Err(HttpError::status(StatusCode::BAD_GATEWAY, "downstream"))
        });

        let chain = compose(&[serialize_context()], terminal);
        let err = chain(new_ctx()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("downstream"));
    }

    #[tokio::test]
    async fn test_fanout_through_installed_wrapper() {
        let terminal = handler(|ctx| async move {
            let safe = ctx
                .as_any()
                .downcast_ref::<SafeContext>()
                .expect("installer ran");

            // Concurrent sub-handlers sharing one request context.
            let jobs = (0..16).map(|n| async move {
                safe.set_value(&format!("job{n}"), n);
                safe.query_param("never-set");
                *safe.get_as::<i32>(&format!("job{n}")).unwrap()
            });
            let results = join_all(jobs).await;

            assert_eq!(results, (0..16).collect::<Vec<_>>());
            safe.string(StatusCode::OK, "fanned out")
        });

        let chain = compose(&[serialize_context()], terminal);
        chain(new_ctx()).await.unwrap();
    }
}
