mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::Service;
use tsu_middleware::middleware::logger::{Config, RequestLogger};
use tsu_middleware::middleware::recovery::Recovery;
use tsu_middleware::middleware::{BoxFuture, Middleware, Next};
use tsu_middleware::{Context, Error, Pipeline, Request, Response};

use common::{context, MemoryLogger};

async fn create_user(req: Request) -> Result<Response, Error> {
    if req.body().is_empty() {
        return Err(Error::msg("empty body"));
    }
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(req.body().to_vec()))
}

/// Rejects requests without an `x-api-key` header.
struct RequireKey;

impl Middleware for RequireKey {
    fn call<'a>(&'a self, cx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if cx.request().header("x-api-key").is_none() {
                cx.abort_with_status(StatusCode::UNAUTHORIZED);
            }
            next.run(cx).await;
        })
    }
}

fn peer() -> SocketAddr {
    "198.51.100.4:51000".parse().unwrap()
}

#[tokio::test]
async fn dispatch_runs_the_pipeline_over_an_http_request() {
    let logger = MemoryLogger::plain();
    let config = Config::new().log_request_body(true).log_response_body(true);
    let pipeline = Pipeline::new(create_user).layer(RequestLogger::with_config(logger.clone(), config));

    let req = http::Request::post("/users")
        .header("user-agent", "curl/8.5")
        .body(Full::new(Bytes::from_static(br#"{"name":"alice"}"#)))
        .unwrap();
    let res = pipeline.dispatch(req, Some(peer())).await;

    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["location"], "/users/99");
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"name":"alice"}"#);

    let record = &logger.records()[0];
    assert_eq!(record.str("ip"), Some("198.51.100.4"));
    assert_eq!(record.str("request-body"), Some(r#"{"name":"alice"}"#));
    assert_eq!(record.str("response-body"), Some(r#"{"name":"alice"}"#));
}

#[tokio::test]
async fn handler_error_result_is_a_500_and_an_error_record() {
    let logger = MemoryLogger::plain();
    let pipeline = Pipeline::new(create_user).layer(RequestLogger::new(logger.clone(), "", false));

    let req = http::Request::post("/users").body(Full::new(Bytes::new())).unwrap();
    let res = pipeline.dispatch(req, None).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let records = logger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].msg, "empty body");
}

#[tokio::test]
async fn aborted_context_skips_remaining_stages_and_handler() {
    let logger = MemoryLogger::plain();
    let pipeline = Pipeline::new(create_user)
        .layer(RequestLogger::new(logger.clone(), "", false))
        .layer(RequireKey);

    let mut cx = context("POST", "/users", br#"{"name":"bob"}"#);
    pipeline.run(&mut cx).await;

    assert!(cx.is_aborted());
    assert_eq!(cx.status(), StatusCode::UNAUTHORIZED);
    assert!(cx.into_response().body().is_empty());
    assert_eq!(logger.records()[0].get("status"), Some(&tsu_middleware::log::Value::Uint(401)));
}

#[tokio::test]
async fn service_answers_every_request_even_when_the_handler_panics() {
    async fn boom(_req: Request) -> Response {
        panic!("boom");
    }

    let logger = MemoryLogger::plain();
    let pipeline = Arc::new(
        Pipeline::new(boom)
            .layer(RequestLogger::new(logger.clone(), "", false))
            .layer(Recovery::new(logger.clone(), false)),
    );
    let service = pipeline.service(peer());

    let req = http::Request::get("/crash").body(Full::new(Bytes::new())).unwrap();
    let res = service.call(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let records = logger.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].msg, "[Recovery from panic]");
    assert_eq!(records[1].msg, "/crash");
    assert_eq!(records[1].get("status"), Some(&tsu_middleware::log::Value::Uint(500)));
}
