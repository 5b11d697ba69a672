//! Middleware composition and the hyper adapter.
//!
//! A [`Pipeline`] is an ordered list of middleware in front of one handler.
//! It does no routing: put a router behind it as the handler, or in front of
//! it as the thing that picks a pipeline.
//!
//! ```rust,no_run
//! use tsu_middleware::{Pipeline, Request, Response};
//! use tsu_middleware::log::TracingLogger;
//! use tsu_middleware::middleware::logger::RequestLogger;
//! use tsu_middleware::middleware::recovery::Recovery;
//!
//! async fn app(req: Request) -> Response {
//!     Response::text(format!("hello from {}", req.path()))
//! }
//!
//! let pipeline = Pipeline::new(app)
//!     .layer(RequestLogger::new(TracingLogger, "%+", true))
//!     .layer(Recovery::new(TracingLogger, false));
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Middleware stack plus terminal handler. Build once, share by `Arc`.
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    endpoint: BoxedHandler,
}

impl Pipeline {
    pub fn new(handler: impl Handler) -> Self {
        Self { middleware: Vec::new(), endpoint: handler.into_boxed_handler() }
    }

    /// Appends a middleware. The first one added is the outermost: it sees
    /// the request first and the response last.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Runs every stage against an existing context.
    pub async fn run(&self, cx: &mut Context) {
        Next::new(&self.middleware, &self.endpoint).run(cx).await;
    }

    /// Collects the body, runs the pipeline, and returns what to send.
    ///
    /// A body that fails mid-read is answered with `400 Bad Request` without
    /// entering the pipeline.
    pub async fn dispatch<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = Error::Body(e.to_string());
                tracing::warn!(path = parts.uri.path(), error = %err, "rejecting request");
                return Response::status(StatusCode::BAD_REQUEST).into_inner();
            }
        };

        let mut request = Request::from(http::Request::from_parts(parts, body));
        request.remote_addr = remote_addr;

        let mut cx = Context::new(request);
        self.run(&mut cx).await;
        cx.into_response().into_inner()
    }

    /// A hyper service bound to one connection's peer address.
    pub fn service(self: &Arc<Self>, remote_addr: SocketAddr) -> PipelineService {
        PipelineService { pipeline: Arc::clone(self), remote_addr: Some(remote_addr) }
    }
}

/// [`hyper::service::Service`] that feeds every request into a [`Pipeline`].
///
/// Never fails: every outcome, including panics caught by
/// [`Recovery`](crate::middleware::recovery::Recovery), is a response.
#[derive(Clone)]
pub struct PipelineService {
    pipeline: Arc<Pipeline>,
    remote_addr: Option<SocketAddr>,
}

impl<B> hyper::service::Service<http::Request<B>> for PipelineService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display + Send,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let remote_addr = self.remote_addr;
        Box::pin(async move { Ok(pipeline.dispatch(req, remote_addr).await) })
    }
}
