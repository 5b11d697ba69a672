//! Response writers.
//!
//! Every request owns exactly one [`ResponseWriter`], held by its
//! [`Context`](crate::Context) as a trait object. Middleware can swap it for
//! a decorator that wraps the previous writer; [`ResponseCapture`] is the one
//! this crate ships.
//!
//! ```text
//! handler ── write ──▶ ResponseCapture ── write ──▶ ResponseBuffer ──▶ client
//!                           │
//!                           └─ tee ──▶ CapturedBody (read by the logger)
//! ```

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use http::StatusCode;

use crate::response::Response;

/// The outbound side of one request.
pub trait ResponseWriter: Send {
    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode);

    fn append_header(&mut self, name: &str, value: &str);

    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Total body bytes accepted so far.
    fn size(&self) -> usize;

    /// Consumes the writer chain and yields the response to send.
    fn finish(self: Box<Self>) -> Response;

    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

// ── ResponseBuffer ────────────────────────────────────────────────────────────

/// The real writer at the bottom of every chain.
///
/// Accumulates the response until the pipeline hands it to hyper.
#[derive(Debug)]
pub struct ResponseBuffer {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self { status: StatusCode::OK, headers: Vec::new(), body: BytesMut::new() }
    }
}

impl ResponseBuffer {
    pub fn new() -> Self { Self::default() }
}

impl ResponseWriter for ResponseBuffer {
    fn status(&self) -> StatusCode { self.status }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> usize { self.body.len() }

    fn finish(self: Box<Self>) -> Response {
        let ResponseBuffer { status, headers, body } = *self;
        Response { body: body.freeze(), headers, status, errors: Vec::new() }
    }
}

// ── ResponseCapture ───────────────────────────────────────────────────────────

/// Shared handle to the bytes a [`ResponseCapture`] has seen.
///
/// Cloning is cheap and every clone reads the same buffer, so whoever
/// installed the capture can read it back no matter how many writers were
/// stacked on top of it since.
#[derive(Clone, Debug, Default)]
pub struct CapturedBody(Arc<Mutex<BytesMut>>);

impl CapturedBody {
    pub fn new() -> Self { Self::default() }

    /// Snapshot of everything captured so far.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decorator that tees every written byte into a [`CapturedBody`].
///
/// Bytes go to the wrapped writer first, then exactly the accepted prefix is
/// appended to the buffer, so the client sees the same bytes it would see
/// without the capture.
///
/// ```rust
/// # use tsu_middleware::{CapturedBody, Context, ResponseCapture};
/// # fn f(cx: &mut Context) {
/// let captured = CapturedBody::new();
/// let buffer = captured.clone();
/// cx.replace_writer(move |w| Box::new(ResponseCapture::with_buffer(w, buffer)));
/// // ... run the rest of the pipeline, then:
/// let body = captured.bytes();
/// # }
/// ```
pub struct ResponseCapture {
    inner: Box<dyn ResponseWriter>,
    captured: CapturedBody,
}

impl ResponseCapture {
    pub fn new(inner: Box<dyn ResponseWriter>) -> Self {
        Self::with_buffer(inner, CapturedBody::new())
    }

    /// Captures into a buffer the caller already holds a handle to.
    pub fn with_buffer(inner: Box<dyn ResponseWriter>, captured: CapturedBody) -> Self {
        Self { inner, captured }
    }

    /// Everything written through this decorator so far.
    pub fn body(&self) -> Bytes { self.captured.bytes() }
}

impl ResponseWriter for ResponseCapture {
    fn status(&self) -> StatusCode { self.inner.status() }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn append_header(&mut self, name: &str, value: &str) {
        self.inner.append_header(name, value);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        let accepted = buf.get(..n).ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inner writer reported {n} bytes written out of {}", buf.len()),
        ))?;
        self.captured.lock().extend_from_slice(accepted);
        Ok(n)
    }

    fn size(&self) -> usize { self.inner.size() }

    fn finish(self: Box<Self>) -> Response {
        self.inner.finish()
    }
}
