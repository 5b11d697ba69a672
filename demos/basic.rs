//! Request logging and panic recovery in front of a tiny JSON handler.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:3000/panic
//!   curl http://localhost:3000/healthz      # not logged

use std::sync::Arc;

use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};
use tsu_middleware::log::{Field, TracingLogger};
use tsu_middleware::middleware::logger::{Config, RequestLogger};
use tsu_middleware::middleware::recovery::Recovery;
use tsu_middleware::{Error, Pipeline, Request, Response};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::new()
        .time_format("%+")
        .utc(true)
        .skip_path("/healthz")
        .log_request_body(true)
        .log_response_body(true)
        .context(|cx| match cx.request().header("x-request-id") {
            Some(id) => vec![Field::str("request-id", id)],
            None => Vec::new(),
        });

    let pipeline = Arc::new(
        Pipeline::new(app)
            .layer(RequestLogger::with_config(TracingLogger, config))
            .layer(Recovery::new(TracingLogger, true)),
    );

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("listening on 0.0.0.0:3000");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("accept error: {e}");
                continue;
            }
        };
        let svc = pipeline.service(remote_addr);
        tokio::spawn(async move {
            if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), svc)
                .await
            {
                error!(peer = %remote_addr, "connection error: {e}");
            }
        });
    }
}

// No router here: the handler matches on the path itself.
async fn app(req: Request) -> Result<Response, Error> {
    match (req.method().as_str(), req.path()) {
        ("GET", "/healthz") => Ok(Response::text("ok")),
        ("GET", "/panic") => panic!("handler bug"),
        ("POST", "/users") => {
            if req.body().is_empty() {
                return Err(Error::msg("empty body"));
            }
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("location", "/users/99")
                .json(r#"{"id":"99","name":"new_user"}"#))
        }
        ("GET", path) if path.starts_with("/users/") => {
            let id = &path["/users/".len()..];
            Ok(Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#)))
        }
        _ => Ok(Response::status(StatusCode::NOT_FOUND)),
    }
}
