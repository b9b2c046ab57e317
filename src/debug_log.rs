use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One generation attempt, captured for offline inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugRecord {
    pub timestamp: DateTime<Utc>,
    pub schema_description: String,
    pub prompt: String,
    pub response: String,
}

impl DebugRecord {
    pub fn new(
        schema_description: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            schema_description: schema_description.into(),
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "=== DEBUG LOG ===\nTIMESTAMP: {}\nSCHEMA: {}\n\nUSER PROMPT:\n{}\n\nAI RESPONSE:\n{}\n\n=================\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.schema_description,
            self.prompt,
            self.response,
        )
    }
}

/// Destination for debug records. Implementations must never fail the caller.
pub trait DebugSink: Send + Sync {
    fn record(&self, record: &DebugRecord);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn record(&self, _record: &DebugRecord) {}
}

/// Appends rendered records to a file, creating parent directories as needed.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DebugSink for FileSink {
    fn record(&self, record: &DebugRecord) {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(error = %err, path = %parent.display(), "failed to create debug log directory");
                return;
            }
        }
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(record.render().as_bytes()) {
                    warn!(error = %err, "failed to write debug log record");
                }
            }
            Err(err) => warn!(error = %err, path = %self.path.display(), "failed to open debug log"),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DebugRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DebugRecord> {
        self.records.lock().clone()
    }
}

impl DebugSink for MemorySink {
    fn record(&self, record: &DebugRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("debugPrompt.log");
        let sink = FileSink::new(&path);
        sink.record(&DebugRecord::new("schema a", "prompt a", "response a"));
        sink.record(&DebugRecord::new("schema b", "prompt b", "response b"));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("=== DEBUG LOG ===").count(), 2);
        assert!(contents.contains("SCHEMA: schema a"));
        assert!(contents.contains("AI RESPONSE:\nresponse b"));
        let first = contents.find("prompt a").unwrap();
        let second = contents.find("prompt b").unwrap();
        assert!(first < second);
    }

    #[test]
    fn file_sink_swallows_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let sink = FileSink::new(dir.path());
        sink.record(&DebugRecord::new("schema", "prompt", "response"));
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(&DebugRecord::new("s", "one", "r"));
        sink.record(&DebugRecord::new("s", "two", "r"));
        let prompts: Vec<_> = sink.records().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["one", "two"]);
    }
}
