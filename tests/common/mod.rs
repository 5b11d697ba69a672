//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tsu_middleware::log::{Field, Level, LeveledLogger, Logger, Value};
use tsu_middleware::{Context, Request};

/// One call made on a [`MemoryLogger`].
#[derive(Clone, Debug)]
pub struct Record {
    pub level: Level,
    pub msg: String,
    pub fields: Vec<Field>,
    /// Whether it arrived through the `LeveledLogger` capability.
    pub leveled: bool,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.key.as_ref()).collect()
    }
}

/// Logger that keeps every record in memory.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<Record>>,
    leveled: bool,
}

impl MemoryLogger {
    /// Exposes only `info` / `error`.
    pub fn plain() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Also exposes the `LeveledLogger` capability.
    pub fn leveled() -> Arc<Self> {
        Arc::new(Self { leveled: true, ..Self::default() })
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    fn push(&self, level: Level, msg: &str, fields: &[Field], leveled: bool) {
        self.records.lock().unwrap().push(Record {
            level,
            msg: msg.to_owned(),
            fields: fields.to_vec(),
            leveled,
        });
    }
}

impl Logger for MemoryLogger {
    fn info(&self, msg: &str, fields: &[Field]) {
        self.push(Level::Info, msg, fields, false);
    }

    fn error(&self, msg: &str, fields: &[Field]) {
        self.push(Level::Error, msg, fields, false);
    }

    fn leveled(&self) -> Option<&dyn LeveledLogger> {
        if self.leveled { Some(self) } else { None }
    }
}

impl LeveledLogger for MemoryLogger {
    fn log(&self, level: Level, msg: &str, fields: &[Field]) {
        self.push(level, msg, fields, true);
    }
}

pub fn context(method: &str, uri: &str, body: &'static [u8]) -> Context {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "integration-test/1.0")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Bytes::from_static(body))
        .unwrap();
    Context::new(Request::from(req))
}
