//! # tsu-middleware
//!
//! Request logging and panic recovery for HTTP services behind a reverse
//! proxy. Two middleware, one job each.
//!
//! - [`RequestLogger`](middleware::logger::RequestLogger) writes one
//!   structured record per request: status, method, path, query, client IP,
//!   user agent, latency, and optionally the JSON request and response
//!   bodies. Health checks and asset paths can be left out by exact path,
//!   by pattern, or by predicate.
//! - [`Recovery`](middleware::recovery::Recovery) catches a handler panic,
//!   tells a departed client apart from a real bug, logs it, and finishes
//!   the response instead of tearing down the connection.
//!
//! Both log through the [`Logger`](log::Logger) trait. Adapt it to whatever
//! sink you run; [`TracingLogger`](log::TracingLogger) ships for `tracing`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tsu_middleware::{Pipeline, Request, Response};
//! use tsu_middleware::log::TracingLogger;
//! use tsu_middleware::middleware::logger::{Config, RequestLogger};
//! use tsu_middleware::middleware::recovery::Recovery;
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         panic!("empty body");
//!     }
//!     Response::json(r#"{"id":"99"}"#)
//! }
//!
//! let config = Config::new()
//!     .time_format("%+")
//!     .skip_path("/healthz")
//!     .log_request_body(true)
//!     .log_response_body(true);
//!
//! // Logger outermost, so a recovered panic is still logged with its 500.
//! let pipeline = Arc::new(
//!     Pipeline::new(create_user)
//!         .layer(RequestLogger::with_config(TracingLogger, config))
//!         .layer(Recovery::new(TracingLogger, true)),
//! );
//! // hand `pipeline.service(peer_addr)` to hyper for each connection
//! ```

mod context;
mod error;
mod handler;
mod pipeline;
mod request;
mod response;
mod writer;

pub mod log;
pub mod middleware;

pub use context::Context;
pub use error::Error;
pub use handler::Handler;
pub use pipeline::{Pipeline, PipelineService};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use writer::{CapturedBody, ResponseBuffer, ResponseCapture, ResponseWriter};
