//! Panic recovery.
//!
//! [`Recovery`] runs the rest of the pipeline under
//! [`catch_unwind`](futures::FutureExt::catch_unwind). A panic below it never
//! escapes; it is classified, logged, and turned into a response.
//!
//! Two kinds of panic are told apart:
//!
//! - **Broken connection.** The payload is an I/O error saying the peer hung
//!   up (`broken pipe`, `connection reset by peer`). The client is gone, so
//!   no status is written: the error is recorded on the context and the
//!   pipeline is aborted.
//! - **Application panic.** Anything else. Logged as
//!   `[Recovery from panic]`, optionally with the backtrace, then the
//!   [`RecoveryFn`] finishes the response. The default answers `500` with an
//!   empty body.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{self, Poll};

use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use http::StatusCode;

use crate::context::Context;
use crate::error::Error;
use crate::log::{Field, Logger};
use crate::middleware::{BoxFuture, Middleware, Next};

/// Finishes a request after an application panic.
pub type RecoveryFn = Arc<dyn Fn(&mut Context, &PanicReport) + Send + Sync>;

const RECOVERY_MESSAGE: &str = "[Recovery from panic]";

// ── Backtrace capture ─────────────────────────────────────────────────────────

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
    static CAPTURE_ARMED: Cell<bool> = const { Cell::new(false) };
}

static INSTALL_HOOK: Once = Once::new();

/// Installs a panic hook that records a backtrace at the panic site.
///
/// By the time `catch_unwind` returns the stack is gone, so the trace has to
/// be taken inside the hook. The hook is process-wide but only captures on a
/// thread that is currently polling a stage under [`Armed`]; other panics
/// go straight to the previous hook.
fn install_backtrace_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURE_ARMED.with(Cell::get) {
                PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            }
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the last panic on this thread.
fn take_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Arms capture on the current thread until dropped.
struct ArmGuard {
    previous: bool,
}

impl ArmGuard {
    fn arm() -> Self {
        Self { previous: CAPTURE_ARMED.with(|armed| armed.replace(true)) }
    }
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        CAPTURE_ARMED.with(|armed| armed.set(self.previous));
    }
}

/// Polls the inner stage with capture armed.
///
/// Arming per poll rather than once per request follows the task to
/// whichever worker thread polls it.
struct Armed<'a>(BoxFuture<'a, ()>);

impl Future for Armed<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<()> {
        let _armed = ArmGuard::arm();
        self.0.as_mut().poll(cx)
    }
}

// ── PanicReport ───────────────────────────────────────────────────────────────

/// What the recovery stage knows about one panic.
pub struct PanicReport {
    payload: Box<dyn Any + Send>,
    request: String,
    backtrace: Option<Backtrace>,
}

impl PanicReport {
    /// The value passed to `panic!` / `panic_any`.
    pub fn payload(&self) -> &(dyn Any + Send) { &*self.payload }

    /// Request line and headers of the request that panicked.
    pub fn request(&self) -> &str { &self.request }

    /// Backtrace at the panic site, when stack capture is enabled.
    pub fn backtrace(&self) -> Option<&Backtrace> { self.backtrace.as_ref() }

    /// The payload rendered as text.
    pub fn message(&self) -> String {
        let payload = self.payload();
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(e) = payload.downcast_ref::<io::Error>() {
            e.to_string()
        } else if let Some(e) = payload.downcast_ref::<Error>() {
            e.to_string()
        } else {
            "Box<dyn Any>".to_owned()
        }
    }

    /// Whether the peer closed the connection under the handler.
    pub fn is_broken_connection(&self) -> bool {
        let payload = self.payload();
        let err = payload.downcast_ref::<io::Error>().or_else(|| match payload.downcast_ref::<Error>() {
            Some(Error::Io(e)) => Some(e),
            _ => None,
        });
        err.is_some_and(is_peer_gone)
    }

    /// Converts the payload into a request error, keeping I/O errors intact.
    fn into_error(self) -> Error {
        let message = self.message();
        let payload = match self.payload.downcast::<io::Error>() {
            Ok(e) => return Error::Io(*e),
            Err(payload) => payload,
        };
        match payload.downcast::<Error>() {
            Ok(e) => *e,
            Err(_) => Error::Panic(message),
        }
    }
}

fn is_peer_gone(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("broken pipe") || message.contains("connection reset by peer")
}

// ── Recovery ──────────────────────────────────────────────────────────────────

/// Middleware that turns panics below it into logged, finished responses.
pub struct Recovery<L> {
    logger: L,
    stack: bool,
    action: RecoveryFn,
}

impl<L: Logger> Recovery<L> {
    /// Recovers with an empty `500 Internal Server Error`.
    ///
    /// `stack` adds the panic-site backtrace to the log record. Traces are
    /// large, so it is off unless asked for.
    ///
    /// With `stack` on, the first such `Recovery` installs a process-wide
    /// panic hook that chains to the previous one. It only pays for a
    /// backtrace while a stage below a stack-enabled `Recovery` is being
    /// polled; panics elsewhere in the process are untouched.
    pub fn new(logger: L, stack: bool) -> Self {
        Self::custom(logger, stack, default_recovery)
    }

    /// Recovers by calling `recover`, which decides the response.
    pub fn custom<F>(logger: L, stack: bool, recover: F) -> Self
    where
        F: Fn(&mut Context, &PanicReport) + Send + Sync + 'static,
    {
        if stack {
            install_backtrace_hook();
        }
        Self { logger, stack, action: Arc::new(recover) }
    }

    fn recover(&self, cx: &mut Context, payload: Box<dyn Any + Send>) {
        let backtrace = take_backtrace();
        let report = PanicReport {
            payload,
            request: cx.request().dump_head(),
            backtrace: if self.stack { backtrace } else { None },
        };

        if report.is_broken_connection() {
            self.logger.error(cx.request().path(), &[
                Field::str("error", report.message()),
                Field::str("request", report.request()),
            ]);
            cx.push_error(report.into_error());
            cx.abort();
            return;
        }

        let mut fields = vec![
            Field::str("time", Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)),
            Field::str("error", report.message()),
            Field::str("request", report.request()),
        ];
        if let Some(trace) = report.backtrace() {
            fields.push(Field::str("stack", trace.to_string()));
        }
        self.logger.error(RECOVERY_MESSAGE, &fields);

        (self.action)(cx, &report);
    }
}

impl<L: Logger> Middleware for Recovery<L> {
    fn call<'a>(&'a self, cx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let stage: BoxFuture<'_, ()> = if self.stack {
                Box::pin(Armed(next.run(cx)))
            } else {
                next.run(cx)
            };
            let outcome = AssertUnwindSafe(stage).catch_unwind().await;
            if let Err(payload) = outcome {
                self.recover(cx, payload);
            }
        })
    }
}

fn default_recovery(cx: &mut Context, _report: &PanicReport) {
    cx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR);
}
