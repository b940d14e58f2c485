//! File-backed sink for decoded PDRs.
//!
//! Decoded JSON is routed on its `@odata.type`: a LogService PDR names the
//! log service and must arrive before any LogEntry PDR; LogEntry PDRs become
//! `Entries/<id>/index.json` documents under that service and trigger a
//! notification; anything else is written at its own `@odata.id` path. Each
//! PDR lands as `<folder>/index.json` so a Redfish front end can serve the
//! tree as-is.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde_json::Value;

/// Upper bound on rotatable LogEntry folders kept on disk, 1000 total
/// retained records minus the saved set.
const MAX_NUM_LOG_ENTRIES: usize = 980;

/// LogEntry folders exempt from rotation (the earliest ones).
const MAX_NUM_SAVED_LOG_ENTRIES: usize = 20;

/// Downstream consumer of decoded JSON records.
pub trait Sink: Send {
    /// Publish one decoded JSON document. Returns `true` on success.
    fn publish_json(&mut self, json: &str) -> bool;
}

/// Signals downstream consumers that a new JSON document is available.
pub trait EntryNotifier: Send {
    /// Announce the path of a newly written log entry document.
    fn notify_new_entry(&mut self, path: &str);
}

/// Notifier that announces new entries through the log stream.
///
/// Stands in where no notification object server is attached.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl EntryNotifier for LoggingNotifier {
    fn notify_new_entry(&mut self, path: &str) {
        tracing::info!(path, "new log entry available");
    }
}

/// Creates PDR document files. Split out so the sink logic is testable
/// without touching the filesystem.
pub trait FileHandler: Send {
    /// Write `content` as `<folder_path>/index.json`, creating the folder.
    fn create_file(&self, folder_path: &str, content: &Value) -> bool;
}

/// [`FileHandler`] writing through `std::fs`.
#[derive(Debug, Default)]
pub struct JsonFileWriter;

impl FileHandler for JsonFileWriter {
    fn create_file(&self, folder_path: &str, content: &Value) -> bool {
        let path = Path::new(folder_path);
        if !path.is_dir() {
            if let Err(e) = fs::create_dir_all(path) {
                tracing::error!(folder_path, error = %e, "failed to create folder");
                return false;
            }
        }
        let file_path = path.join("index.json");
        match serde_json::to_string(content) {
            Ok(serialized) => {
                if let Err(e) = fs::write(&file_path, serialized) {
                    tracing::error!(path = %file_path.display(), error = %e, "failed to write file");
                    return false;
                }
                tracing::debug!(path = %file_path.display(), "created");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize PDR");
                false
            }
        }
    }
}

/// Sink that persists decoded PDRs as a Redfish file tree.
pub struct FileSink {
    root_path: String,
    file_handler: Box<dyn FileHandler>,
    notifier: Box<dyn EntryNotifier>,
    log_service_id: Option<String>,
    saved_entries: usize,
    entry_queue: VecDeque<String>,
}

impl FileSink {
    /// Create a sink rooted at `root_path`.
    pub fn new(
        root_path: &str,
        file_handler: Box<dyn FileHandler>,
        notifier: Box<dyn EntryNotifier>,
    ) -> Self {
        Self {
            root_path: root_path.trim_end_matches('/').to_string(),
            file_handler,
            notifier,
            log_service_id: None,
            saved_entries: 0,
            entry_queue: VecDeque::new(),
        }
    }

    fn process_log_entry(&mut self, mut log_entry: Value) -> bool {
        let Some(service_id) = self.log_service_id.as_deref() else {
            tracing::error!("need a LogService PDR before any LogEntry");
            return false;
        };

        // Rotation: once the queue has grown past the limit, drop the oldest
        // rotatable entry before adding another.
        if self.entry_queue.len() > MAX_NUM_LOG_ENTRIES {
            let oldest = self.entry_queue.pop_front().expect("queue is non-empty");
            if let Err(e) = fs::remove_dir_all(&oldest) {
                tracing::error!(path = %oldest, error = %e, "failed to delete oldest log entry");
                return false;
            }
        }

        let id = unique_entry_id();
        let full_path = format!(
            "{}/redfish/v1/Systems/system/LogServices/{}/Entries/{}",
            self.root_path, service_id, id
        );

        log_entry["Id"] = Value::String(id);
        // The front end fills @odata.id back in for clients.
        if let Some(map) = log_entry.as_object_mut() {
            map.remove("@odata.id");
        }

        if !self.file_handler.create_file(&full_path, &log_entry) {
            tracing::error!(path = %full_path, "failed to create log entry file");
            return false;
        }
        self.notifier
            .notify_new_entry(&format!("{full_path}/index.json"));

        if self.saved_entries < MAX_NUM_SAVED_LOG_ENTRIES {
            self.saved_entries += 1;
        } else {
            self.entry_queue.push_back(full_path);
        }
        true
    }

    fn process_log_service(&mut self, log_service: &Value) -> bool {
        let Some(odata_id) = log_service["@odata.id"].as_str() else {
            tracing::error!("@odata.id field missing from LogService PDR");
            return false;
        };
        let Some(id) = log_service["Id"].as_str() else {
            tracing::error!("Id field missing from LogService PDR");
            return false;
        };
        self.log_service_id = Some(id.to_string());

        let service_path = format!("{}{}", self.root_path, odata_id);
        if !self.file_handler.create_file(&service_path, log_service) {
            return false;
        }
        // The front end expects an Entries collection document, even empty.
        self.file_handler
            .create_file(&format!("{service_path}/Entries"), &Value::Object(Default::default()))
    }

    fn process_other(&mut self, pdr: &Value) -> bool {
        let Some(odata_id) = pdr["@odata.id"].as_str() else {
            tracing::error!("@odata.id field missing from PDR");
            return false;
        };
        self.file_handler
            .create_file(&format!("{}{}", self.root_path, odata_id), pdr)
    }
}

impl Sink for FileSink {
    fn publish_json(&mut self, json: &str) -> bool {
        let decoded: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "sink received invalid JSON");
                return false;
            }
        };
        let Some(odata_type) = decoded["@odata.type"].as_str() else {
            tracing::error!("@odata.type field missing from PDR");
            return false;
        };

        if odata_type.contains("LogEntry") {
            self.process_log_entry(decoded)
        } else if odata_type.contains("LogService") {
            self.process_log_service(&decoded)
        } else {
            self.process_other(&decoded)
        }
    }
}

/// Unique entry ID from system time mixed with the process ID.
fn unique_entry_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = u64::from(std::process::id());
    format!("{:016x}", nanos.wrapping_mul(0x517cc1b727220a95) ^ pid)
}
