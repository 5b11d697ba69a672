//! The terminal handler and why it is type-erased.
//!
//! A pipeline has exactly one handler, so erasing it is not about storing
//! many of them. It is about [`Next`](crate::middleware::Next): every
//! middleware receives a `Next` that eventually calls the handler. If `Next`
//! carried the handler's type, `Middleware::call` would be generic over it,
//! and a generic method cannot live behind the `Arc<dyn Middleware>` the
//! pipeline keeps its stages in. Holding a `&BoxedHandler` keeps `Next`
//! (and so every middleware) free of handler types.
//!
//! ```text
//! async fn app(req: Request) -> Result<Response, Error>
//!        │ Pipeline::new(app)
//!        ▼
//! BoxedHandler ◀── &'a ── Next<'a> ◀── Middleware::call
//!        │ at the end of the chain
//!        ▼
//! Response ── Context::respond ──▶ current ResponseWriter
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::middleware::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Object-safe face of a handler. Public only because
/// [`Handler::into_boxed_handler`] names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Anything that can end a [`Pipeline`](crate::Pipeline): an `async fn`
/// (or closure) taking the request and returning something
/// [`IntoResponse`], such as `Response` or `Result<Response, Error>`.
///
/// Sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Adapts a handler function to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
