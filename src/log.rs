//! Log sink interface.
//!
//! The middleware never formats or ships log lines itself. It assembles an
//! ordered list of [`Field`]s and hands them to a [`Logger`], a two-method
//! capability trait that any logging library can be adapted to.
//!
//! A sink that can log at an arbitrary level also exposes [`LeveledLogger`]
//! through [`Logger::leveled`]; the request logger prefers it when present.
//!
//! [`TracingLogger`] is the adapter onto the `tracing` crate.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

// ── Level ─────────────────────────────────────────────────────────────────────

/// Severity of a record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Info,
    Error,
}

// ── Field ─────────────────────────────────────────────────────────────────────

/// Typed value of a log [`Field`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Uint(u64),
    Bool(bool),
    /// Rendered the way `Duration`'s `Debug` does: `1.204ms`.
    #[serde(serialize_with = "serialize_duration")]
    Duration(Duration),
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{d:?}"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v)      => f.write_str(v),
            Self::Int(v)      => write!(f, "{v}"),
            Self::Uint(v)     => write!(f, "{v}"),
            Self::Bool(v)     => write!(f, "{v}"),
            Self::Duration(v) => write!(f, "{v:?}"),
        }
    }
}

/// One named value in a log record.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub key: Cow<'static, str>,
    pub value: Value,
}

impl Field {
    pub fn new(key: impl Into<Cow<'static, str>>, value: Value) -> Self {
        Self { key: key.into(), value }
    }

    pub fn str(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self::new(key, Value::Str(value.into()))
    }

    pub fn int(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    pub fn uint(key: impl Into<Cow<'static, str>>, value: u64) -> Self {
        Self::new(key, Value::Uint(value))
    }

    pub fn bool(key: impl Into<Cow<'static, str>>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    pub fn duration(key: impl Into<Cow<'static, str>>, value: Duration) -> Self {
        Self::new(key, Value::Duration(value))
    }
}

/// Borrowed field list that serializes as one JSON object, keys in order.
pub struct Fields<'a>(pub &'a [Field]);

impl Serialize for Fields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for field in self.0 {
            map.serialize_entry(field.key.as_ref(), &field.value)?;
        }
        map.end()
    }
}

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

/// The minimal sink the middleware needs.
pub trait Logger: Send + Sync + 'static {
    fn info(&self, msg: &str, fields: &[Field]);

    fn error(&self, msg: &str, fields: &[Field]);

    /// Optional capability: direct logging at any [`Level`].
    fn leveled(&self) -> Option<&dyn LeveledLogger> {
        None
    }
}

/// A sink that accepts the level as a parameter.
pub trait LeveledLogger: Send + Sync {
    fn log(&self, level: Level, msg: &str, fields: &[Field]);
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn info(&self, msg: &str, fields: &[Field]) {
        (**self).info(msg, fields);
    }

    fn error(&self, msg: &str, fields: &[Field]) {
        (**self).error(msg, fields);
    }

    fn leveled(&self) -> Option<&dyn LeveledLogger> {
        (**self).leveled()
    }
}

// ── TracingLogger ─────────────────────────────────────────────────────────────

/// [`Logger`] that emits `tracing` events.
///
/// The message becomes the event message; the fields are rendered as one
/// JSON object under the `fields` key, since `tracing` field names must be
/// known at compile time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str, fields: &[Field]) {
        tracing::info!(fields = %Fields(fields), "{msg}");
    }

    fn error(&self, msg: &str, fields: &[Field]) {
        tracing::error!(fields = %Fields(fields), "{msg}");
    }

    fn leveled(&self) -> Option<&dyn LeveledLogger> {
        Some(self)
    }
}

impl LeveledLogger for TracingLogger {
    fn log(&self, level: Level, msg: &str, fields: &[Field]) {
        match level {
            Level::Info  => self.info(msg, fields),
            Level::Error => self.error(msg, fields),
        }
    }
}
