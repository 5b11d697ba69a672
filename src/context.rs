//! Per-request state shared by every pipeline stage.

use http::StatusCode;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::writer::{ResponseBuffer, ResponseWriter};

/// Everything one request carries through the pipeline.
///
/// Middleware receives `&mut Context`, may inspect or change it, hands it to
/// [`Next::run`](crate::middleware::Next::run), and reads it again once the
/// rest of the pipeline has returned: the status, the recorded errors and
/// whatever went through the writer are all visible at that point.
pub struct Context {
    request: Request,
    writer: Box<dyn ResponseWriter>,
    errors: Vec<Error>,
    aborted: bool,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            writer: Box::new(ResponseBuffer::new()),
            errors: Vec::new(),
            aborted: false,
        }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }

    pub fn writer(&self) -> &dyn ResponseWriter { &*self.writer }
    pub fn writer_mut(&mut self) -> &mut dyn ResponseWriter { &mut *self.writer }

    /// Swaps the writer for one built around the current writer.
    ///
    /// ```rust
    /// # use tsu_middleware::{Context, ResponseCapture};
    /// # fn f(cx: &mut Context) {
    /// cx.replace_writer(|w| Box::new(ResponseCapture::new(w)));
    /// # }
    /// ```
    pub fn replace_writer<F>(&mut self, wrap: F)
    where
        F: FnOnce(Box<dyn ResponseWriter>) -> Box<dyn ResponseWriter>,
    {
        let current = std::mem::replace(&mut self.writer, Box::new(ResponseBuffer::new()));
        self.writer = wrap(current);
    }

    /// Status written so far. `200 OK` until something sets it.
    pub fn status(&self) -> StatusCode { self.writer.status() }

    pub fn errors(&self) -> &[Error] { &self.errors }

    /// Records a request-scoped error. The request otherwise continues.
    pub fn push_error(&mut self, err: impl Into<Error>) {
        self.errors.push(err.into());
    }

    /// Stops the pipeline: stages that have not run yet are skipped.
    /// Nothing is written.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn abort_with_status(&mut self, status: StatusCode) {
        self.writer.set_status(status);
        self.abort();
    }

    pub fn is_aborted(&self) -> bool { self.aborted }

    /// Writes a handler's response through the current writer and takes over
    /// the errors it carries.
    pub fn respond(&mut self, response: Response) {
        let Response { body, headers, status, errors } = response;
        self.errors.extend(errors);
        self.writer.set_status(status);
        for (name, value) in &headers {
            self.writer.append_header(name, value);
        }
        if let Err(e) = self.writer.write_all(&body) {
            self.errors.push(Error::Io(e));
        }
    }

    /// Finishes the writer chain. Recorded errors are not sent to the client.
    pub fn into_response(self) -> Response {
        self.writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn context() -> Context {
        let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
        Context::new(Request::from(req))
    }

    #[test]
    fn respond_writes_through_writer_and_moves_errors() {
        let mut cx = context();
        cx.respond(
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .text("missing")
                .with_error(Error::msg("no such user")),
        );

        assert_eq!(cx.status(), StatusCode::NOT_FOUND);
        assert_eq!(cx.errors().len(), 1);
        assert_eq!(cx.writer().size(), 7);

        let res = cx.into_response();
        assert_eq!(res.body(), b"missing");
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
        assert!(res.errors().is_empty());
    }

    #[test]
    fn abort_with_status_sets_status_without_body() {
        let mut cx = context();
        cx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(cx.is_aborted());
        let res = cx.into_response();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.body().is_empty());
    }
}
