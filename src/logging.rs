//! Structured JSON logging.
//!
//! One line per event on stdout (and, best-effort, an `events.jsonl`
//! under `LOG_DIR`), filterable by level and domain through the
//! environment. Credential-shaped fields are redacted before emission.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or(Level::Info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Ingest,    // File parsing, dataset registration
    Analysis,  // Provider calls, spec validation
    Filter,    // Slicer state changes
    Layout,    // Reorder/hide/persist
    Storage,   // Durable client storage
    Workspace, // Phase transitions
    System,    // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Analysis => "analysis",
            Domain::Filter => "filter",
            Domain::Layout => "layout",
            Domain::Storage => "storage",
            Domain::Workspace => "workspace",
            Domain::System => "system",
        }
    }

    /// LOG_DOMAINS: comma-separated list, or "all" (the default).
    pub fn is_enabled(&self) -> bool {
        let Ok(domains) = std::env::var("LOG_DOMAINS") else {
            return true;
        };
        domains == "all" || domains.split(',').any(|d| d.trim() == self.as_str())
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);
static SINK: OnceLock<Sink> = OnceLock::new();

struct Sink {
    run_id: String,
    file: Option<Mutex<BufWriter<File>>>,
}

impl Sink {
    fn get() -> &'static Sink {
        SINK.get_or_init(|| {
            let run_id = std::env::var("RUN_ID")
                .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
            let file = std::env::var("LOG_DIR").ok().and_then(|base| {
                let dir: PathBuf = [base.as_str(), run_id.as_str()].iter().collect();
                if let Err(err) = create_dir_all(&dir) {
                    eprintln!("[log] cannot create {}: {}", dir.display(), err);
                    return None;
                }
                match File::create(dir.join("events.jsonl")) {
                    Ok(f) => Some(Mutex::new(BufWriter::new(f))),
                    Err(err) => {
                        eprintln!("[log] cannot create events file: {}", err);
                        None
                    }
                }
            });
            Sink { run_id, file }
        })
    }

    fn write(&self, line: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut w) = file.lock() {
                let _ = writeln!(w, "{}", line);
            }
        }
        println!("{}", line);
    }
}

const REDACTED_KEYS: [&str; 4] = ["api_key", "key", "authorization", "Authorization"];

fn redact(fields: &mut Map<String, Value>) {
    for key in REDACTED_KEYS {
        if let Some(slot) = fields.get_mut(key) {
            *slot = Value::String("[REDACTED]".to_string());
        }
    }
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit one structured event line.
pub fn log(level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let sink = Sink::get();
    redact(&mut fields);
    let entry = json!({
        "ts": ts_now(),
        "run_id": sink.run_id,
        "seq": SEQ.fetch_add(1, Ordering::SeqCst),
        "lvl": level.as_str().to_uppercase(),
        "domain": domain.as_str(),
        "event": event,
        "data": fields,
    });
    sink.write(&entry.to_string());
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
