//! Structured request logging.
//!
//! [`RequestLogger`] runs the rest of the pipeline, then writes one record
//! per request to a [`Logger`]:
//!
//! | field           | when                                             |
//! |-----------------|--------------------------------------------------|
//! | `status`        | always                                           |
//! | `method`        | always                                           |
//! | `path`          | always, as seen *before* the handler ran         |
//! | `query`         | always, as seen *before* the handler ran         |
//! | `ip`            | always                                           |
//! | `user-agent`    | always                                           |
//! | `latency`       | always                                           |
//! | `request-body`  | body logging on and the body is JSON             |
//! | `response-body` | body logging on and the response is JSON         |
//! | `time`          | a time format is configured                      |
//! | *(custom)*      | a context extractor is configured                |
//!
//! Requests that recorded errors produce one `error` record per error, with
//! the error text as the message. Everything else produces one record at
//! the configured default level.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::context::Context;
use crate::error::Error;
use crate::log::{Field, Level, Logger};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::writer::{CapturedBody, ResponseCapture};

/// Extracts extra fields from a finished request.
pub type ContextFn = Arc<dyn Fn(&Context) -> Vec<Field> + Send + Sync>;

/// Decides, after the handler ran, that a request should not be logged.
pub type Skipper = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

// ── Config ────────────────────────────────────────────────────────────────────

/// Request logger configuration.
///
/// Built once at startup and shared read-only by every request.
///
/// ```rust
/// use regex::Regex;
/// use tsu_middleware::log::{Field, Level};
/// use tsu_middleware::middleware::logger::Config;
///
/// let config = Config::new()
///     .time_format("%+")
///     .utc(true)
///     .skip_path("/healthz")
///     .skip_path_regex(Regex::new(r"^/assets/").unwrap())
///     .context(|cx| vec![Field::str("request-id", cx.request().header("x-request-id").unwrap_or(""))])
///     .log_request_body(true);
/// ```
#[derive(Clone, Default)]
pub struct Config {
    time_format: String,
    utc: bool,
    skip_paths: HashSet<String>,
    skip_path_regexps: Vec<Regex>,
    context: Option<ContextFn>,
    default_level: Level,
    skipper: Option<Skipper>,
    log_request_body: bool,
    log_response_body: bool,
}

impl Config {
    pub fn new() -> Self { Self::default() }

    /// chrono `strftime` format for the `time` field. Empty omits the field.
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    /// Format `time` in UTC instead of the local zone.
    pub fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Never log requests for exactly this path.
    pub fn skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip_paths.insert(path.into());
        self
    }

    pub fn skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Never log requests whose path matches `pattern`.
    pub fn skip_path_regex(mut self, pattern: Regex) -> Self {
        self.skip_path_regexps.push(pattern);
        self
    }

    pub fn context<F>(mut self, extract: F) -> Self
    where
        F: Fn(&Context) -> Vec<Field> + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(extract));
        self
    }

    /// Level for requests without errors.
    pub fn default_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn skipper<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skip));
        self
    }

    /// Log JSON request bodies. Non-JSON bodies are never logged.
    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.log_request_body = enabled;
        self
    }

    /// Log JSON response bodies. Non-JSON bodies are never logged.
    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.log_response_body = enabled;
        self
    }

    /// Compiles deserialized settings.
    ///
    /// Fails on the first skip pattern that is not a valid regex, or on a
    /// time format chrono cannot render.
    pub fn from_settings(settings: &LoggerSettings) -> Result<Self, Error> {
        if StrftimeItems::new(&settings.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::TimeFormat(settings.time_format.clone()));
        }
        let skip_path_regexps = settings.skip_path_regexps.iter()
            .map(|pattern| Regex::new(pattern).map_err(|source| Error::Pattern {
                pattern: pattern.clone(),
                source,
            }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            time_format: settings.time_format.clone(),
            utc: settings.utc,
            skip_paths: settings.skip_paths.iter().cloned().collect(),
            skip_path_regexps,
            context: None,
            default_level: settings.default_level,
            skipper: None,
            log_request_body: settings.log_request_body,
            log_response_body: settings.log_response_body,
        })
    }

    /// Whether a finished request stays out of the log.
    ///
    /// Any single match suppresses the record: the exact path set, the
    /// skipper, or any one of the patterns.
    fn skips(&self, path: &str, cx: &Context) -> bool {
        if self.skip_paths.contains(path) {
            return true;
        }
        if self.skipper.as_ref().is_some_and(|skip| skip(cx)) {
            return true;
        }
        self.skip_path_regexps.iter().any(|re| re.is_match(path))
    }

    fn timestamp(&self) -> Option<String> {
        if self.time_format.is_empty() {
            return None;
        }
        let mut out = String::new();
        // An invalid format surfaces as fmt::Error here rather than a panic.
        let written = if self.utc {
            write!(out, "{}", Utc::now().format(&self.time_format))
        } else {
            write!(out, "{}", Local::now().format(&self.time_format))
        };
        written.ok().map(|()| out)
    }
}

/// Data-only logger settings, as read from a config file.
///
/// ```rust
/// use tsu_middleware::middleware::logger::{Config, LoggerSettings};
///
/// let settings: LoggerSettings = serde_json::from_str(r#"{
///     "time_format": "%+",
///     "skip_paths": ["/healthz"],
///     "skip_path_regexps": ["^/assets/"],
///     "default_level": "info"
/// }"#).unwrap();
/// let config = Config::from_settings(&settings).unwrap();
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    pub time_format: String,
    pub utc: bool,
    pub skip_paths: Vec<String>,
    pub skip_path_regexps: Vec<String>,
    pub default_level: Level,
    pub log_request_body: bool,
    pub log_response_body: bool,
}

// ── RequestLogger ─────────────────────────────────────────────────────────────

/// Middleware that writes one structured record per request.
///
/// It does not catch panics. Put a [`Recovery`](super::recovery::Recovery)
/// after it so a panicking handler still produces a record with the
/// recovered status.
pub struct RequestLogger<L> {
    logger: L,
    config: Config,
}

impl<L: Logger> RequestLogger<L> {
    /// Logs every request at `Info`, stamping `time` with `time_format`
    /// (omitted when empty), in UTC if `utc` is set.
    pub fn new(logger: L, time_format: &str, utc: bool) -> Self {
        Self::with_config(logger, Config::new().time_format(time_format).utc(utc))
    }

    pub fn with_config(logger: L, config: Config) -> Self {
        Self { logger, config }
    }

    fn emit(&self, cx: &Context, path: &str, fields: &[Field]) {
        if !cx.errors().is_empty() {
            for err in cx.errors() {
                self.logger.error(&err.to_string(), fields);
            }
            return;
        }
        match (self.logger.leveled(), self.config.default_level) {
            (Some(leveled), level) => leveled.log(level, "", fields),
            (None, Level::Info)    => self.logger.info(path, fields),
            (None, Level::Error)   => self.logger.error(path, fields),
        }
    }
}

impl<L: Logger> Middleware for RequestLogger<L> {
    fn call<'a>(&'a self, cx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let start = Instant::now();
            // Later stages may rewrite the URI in place.
            let path = cx.request().path().to_owned();
            let query = cx.request().query().to_owned();

            let request_body = if self.config.log_request_body {
                capture_request_body(cx)
            } else {
                None
            };
            // Held here so later stages may stack more writers on top.
            let captured = self.config.log_response_body.then(|| {
                let captured = CapturedBody::new();
                let buffer = captured.clone();
                cx.replace_writer(move |w| Box::new(ResponseCapture::with_buffer(w, buffer)));
                captured
            });

            next.run(cx).await;

            if self.config.skips(&path, cx) {
                return;
            }

            let latency = start.elapsed();
            let req = cx.request();
            let mut fields = vec![
                Field::uint("status", u64::from(cx.status().as_u16())),
                Field::str("method", req.method().as_str()),
                Field::str("path", path.as_str()),
                Field::str("query", query),
                Field::str("ip", req.client_ip()),
                Field::str("user-agent", req.user_agent()),
                Field::duration("latency", latency),
            ];
            if let Some(body) = request_body {
                fields.push(Field::str("request-body", body));
            }
            if let Some(body) = captured.and_then(|c| json_text(&c.bytes())) {
                fields.push(Field::str("response-body", body));
            }
            if let Some(time) = self.config.timestamp() {
                fields.push(Field::str("time", time));
            }
            if let Some(extract) = &self.config.context {
                fields.extend(extract(&*cx));
            }

            self.emit(cx, &path, &fields);
        })
    }
}

/// Reads the request body for logging and puts the same bytes back.
///
/// Returns the body text only when it is non-empty, valid JSON.
fn capture_request_body(cx: &mut Context) -> Option<String> {
    let body = cx.request_mut().take_body();
    let logged = json_text(&body);
    cx.request_mut().set_body(body);
    logged
}

/// `bytes` as text if it is a complete JSON document.
fn json_text(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    serde_json::from_str::<serde::de::IgnoredAny>(text).ok()?;
    Some(text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::request::Request;

    fn context(path: &str) -> Context {
        let req = http::Request::builder().uri(path).body(Bytes::new()).unwrap();
        Context::new(Request::from(req))
    }

    #[test]
    fn json_text_accepts_only_complete_json() {
        assert_eq!(json_text(br#"{"a":1}"#).as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(json_text(b"[1, 2]").as_deref(), Some("[1, 2]"));
        assert_eq!(json_text(b"not json"), None);
        assert_eq!(json_text(br#"{"a":"#), None);
        assert_eq!(json_text(b""), None);
        assert_eq!(json_text(&[0xff, 0xfe]), None);
    }

    #[test]
    fn any_matching_pattern_skips() {
        let config = Config::new()
            .skip_path_regex(Regex::new("^/assets/").unwrap())
            .skip_path_regex(Regex::new("^/static/").unwrap());
        let cx = context("/");

        assert!(config.skips("/assets/app.js", &cx));
        assert!(config.skips("/static/logo.png", &cx));
        assert!(!config.skips("/users", &cx));
    }

    #[test]
    fn exact_paths_and_skipper_skip() {
        let config = Config::new()
            .skip_paths(["/healthz", "/readyz"])
            .skipper(|cx| cx.request().header("x-no-log").is_some());

        assert!(config.skips("/healthz", &context("/healthz")));
        assert!(!config.skips("/healthz/deep", &context("/healthz/deep")));

        let req = http::Request::builder().uri("/users").header("x-no-log", "1").body(Bytes::new()).unwrap();
        assert!(config.skips("/users", &Context::new(Request::from(req))));
    }

    #[test]
    fn settings_compile_into_config() {
        let settings: LoggerSettings = serde_json::from_str(r#"{
            "time_format": "%Y-%m-%d",
            "utc": true,
            "skip_paths": ["/healthz"],
            "skip_path_regexps": ["^/assets/"],
            "default_level": "error",
            "log_response_body": true
        }"#).unwrap();
        let config = Config::from_settings(&settings).unwrap();

        assert!(config.utc);
        assert_eq!(config.default_level, Level::Error);
        assert!(config.log_response_body);
        assert!(!config.log_request_body);
        assert!(config.skips("/assets/x.css", &context("/")));
        assert_eq!(config.timestamp().map(|t| t.len()), Some(10));
    }

    #[test]
    fn settings_reject_bad_pattern_and_time_format() {
        let bad_pattern = LoggerSettings { skip_path_regexps: vec!["(".into()], ..Default::default() };
        assert!(matches!(Config::from_settings(&bad_pattern), Err(Error::Pattern { .. })));

        let bad_format = LoggerSettings { time_format: "%Q".into(), ..Default::default() };
        assert!(matches!(Config::from_settings(&bad_format), Err(Error::TimeFormat(_))));
    }

    #[test]
    fn empty_time_format_omits_timestamp() {
        assert_eq!(Config::new().timestamp(), None);
        assert!(Config::new().time_format("%s").timestamp().is_some());
    }
}
