/// Process-wide logger: env_logger decides what is enabled, every accepted
/// record is kept in a bounded ring, appended to the backend log file and
/// broadcast to /logs/stream subscribers.
use chrono::{SecondsFormat, Utc};
use env_logger::{Logger, Target};
use log::{Level, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tokio::sync::broadcast;

const MAX_LOG_ENTRIES: usize = 2000;
const STREAM_CAPACITY: usize = 512;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    fn now(level: Level, target: &str, message: String) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.as_str().to_lowercase(),
            target: target.to_string(),
            message,
        }
    }

    fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::Trace)
    }

    fn to_line(&self) -> String {
        format!(
            "{} [{}] [{}] {}",
            self.timestamp,
            self.level.to_uppercase(),
            self.target,
            self.message.replace('\n', "\\n")
        )
    }
}

pub struct LogHub {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
        let _ = self.tx.send(entry);
    }

    /// Newest `limit` entries at or above `min_level`, oldest first.
    pub fn recent(&self, limit: usize, min_level: Level) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut selected: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|entry| entry.level() <= min_level)
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

static LOG_HUB: LazyLock<LogHub> = LazyLock::new(|| LogHub::new(MAX_LOG_ENTRIES));

struct LogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LogFile {
    fn new() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("platto")
            .join("logs")
            .join("backend.log");
        let file = Self::open(&path).ok();
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    fn open(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn append(&self, entry: &LogEntry) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            match Self::open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(_) => return,
            }
        }
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", entry.to_line());
            let _ = file.flush();
        }
    }
}

static LOG_FILE: LazyLock<LogFile> = LazyLock::new(LogFile::new);

struct BroadcastLogger {
    inner: Logger,
}

impl Log for BroadcastLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = LogEntry::now(record.level(), record.target(), record.args().to_string());
        LOG_FILE.append(&entry);
        LOG_HUB.push(entry);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the logger. RUST_LOG filters as usual; the default is
/// `info` for platto targets and `warn` for everything else.
pub fn init() -> Result<(), SetLoggerError> {
    let _ = &*LOG_FILE;
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,platto=info,platto_backend=info"),
    );
    builder.target(Target::Pipe(Box::new(io::sink())));
    let logger = Box::leak(Box::new(BroadcastLogger {
        inner: builder.build(),
    }));
    log::set_logger(logger)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

pub fn recent_entries(limit: usize, min_level: Level) -> Vec<LogEntry> {
    LOG_HUB.recent(limit, min_level)
}

pub fn subscribe() -> broadcast::Receiver<LogEntry> {
    LOG_HUB.subscribe()
}

pub fn log_file_path() -> String {
    LOG_FILE.path.display().to_string()
}

/// Record a line even when the logger could not be installed.
pub fn write_fallback_line(message: &str) {
    let entry = LogEntry::now(Level::Error, "platto.log_bridge", message.to_string());
    eprintln!("{}", entry.to_line());
    LOG_FILE.append(&entry);
    LOG_HUB.push(entry);
}
