//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware receives the request's
//! [`Context`] and a [`Next`] continuation. It may act before calling
//! `next.run(cx)`, after it, or not call it at all.
//!
//! ```text
//! Pipeline ─▶ RequestLogger ─▶ Recovery ─▶ handler
//!                 ▲               ▲           │
//!                 └── log line ───┴── panic ──┘
//! ```
//!
//! Built-in middleware:
//! - [`logger::RequestLogger`] — one structured record per request with
//!   method, path, status, latency and optional bodies
//! - [`recovery::Recovery`] — catches handler panics, logs them, and
//!   finishes the response

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::BoxedHandler;

pub mod logger;
pub mod recovery;

/// A heap-allocated, type-erased, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One pipeline stage in front of the handler.
///
/// ```rust
/// use tsu_middleware::Context;
/// use tsu_middleware::middleware::{BoxFuture, Middleware, Next};
///
/// struct PoweredBy;
///
/// impl Middleware for PoweredBy {
///     fn call<'a>(&'a self, cx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
///         Box::pin(async move {
///             cx.writer_mut().append_header("x-powered-by", "tsu");
///             next.run(cx).await;
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, cx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()>;
}

/// The rest of the pipeline, from the point of view of one middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a BoxedHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a BoxedHandler) -> Self {
        Self { chain, endpoint }
    }

    /// Runs the remaining stages and finally the handler.
    ///
    /// Does nothing once the context has been aborted.
    pub fn run<'b>(self, cx: &'b mut Context) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        if cx.is_aborted() {
            return Box::pin(std::future::ready(()));
        }
        match self.chain.split_first() {
            Some((middleware, rest)) => middleware.call(cx, Next::new(rest, self.endpoint)),
            None => {
                let endpoint = self.endpoint;
                Box::pin(async move {
                    let response = endpoint.call(cx.request().clone()).await;
                    cx.respond(response);
                })
            }
        }
    }
}
