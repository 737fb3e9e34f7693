//! Append-only record of what the server did, one line per event.

use crate::cli::JournalFormat;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

pub trait Journal: Send + Sync {
    fn session_opened(&self, _session: &str, _peer: &SocketAddr) {}
    fn session_closed(&self, _session: &str) {}
    fn stored(&self, _session: &str, _file: &str, _bytes: u64, _seconds: f32) {}
    fn sent(&self, _session: &str, _file: &str, _bytes: u64, _seconds: f32) {}
    fn listed(&self, _session: &str, _files: usize, _total: u64) {}
    fn removed(&self, _session: &str, _file: &str) {}
    fn failed(&self, _session: &str, _operation: &str, _msg: &str) {}
}

pub struct NoopJournal;
impl Journal for NoopJournal {}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open journal file {}", path.display()))
}

/// `[timestamp] EVENT key=value ...`
pub struct TextJournal {
    file: Mutex<File>,
}

impl TextJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(open_append(path.as_ref())?),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Journal for TextJournal {
    fn session_opened(&self, session: &str, peer: &SocketAddr) {
        self.line(&format!("OPEN session={} peer={}", session, peer));
    }
    fn session_closed(&self, session: &str) {
        self.line(&format!("CLOSE session={}", session));
    }
    fn stored(&self, session: &str, file: &str, bytes: u64, seconds: f32) {
        self.line(&format!(
            "UPLOAD session={} file={} bytes={} seconds={:.3}",
            session, file, bytes, seconds
        ));
    }
    fn sent(&self, session: &str, file: &str, bytes: u64, seconds: f32) {
        self.line(&format!(
            "DOWNLOAD session={} file={} bytes={} seconds={:.3}",
            session, file, bytes, seconds
        ));
    }
    fn listed(&self, session: &str, files: usize, total: u64) {
        self.line(&format!("LIST session={session} files={files} bytes={total}"));
    }
    fn removed(&self, session: &str, file: &str) {
        self.line(&format!("REMOVE session={} file={}", session, file));
    }
    fn failed(&self, session: &str, operation: &str, msg: &str) {
        self.line(&format!(
            "ERROR session={} op={} msg={}",
            session, operation, msg
        ));
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    Open,
    Close,
    Upload,
    Download,
    List,
    Remove,
    Error,
}

#[derive(Serialize, Debug)]
pub struct JournalEntry<'a> {
    pub timestamp: String,
    pub event: JournalEvent,
    pub session: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> JournalEntry<'a> {
    fn new(event: JournalEvent, session: &'a str) -> Self {
        JournalEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
            session,
            peer: None,
            file: None,
            bytes: None,
            files: None,
            seconds: None,
            error: None,
        }
    }
}

/// One JSON object per line
pub struct JsonJournal {
    file: Mutex<File>,
}

impl JsonJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(open_append(path.as_ref())?),
        })
    }

    fn add_entry(&self, entry: &JournalEntry<'_>) {
        let mut f = self.file.lock();
        let mut writer = BufWriter::new(&mut *f);
        if serde_json::to_writer(&mut writer, entry).is_ok() {
            let _ = writer.write_all(b"\n");
        }
        let _ = writer.flush();
    }
}

impl Journal for JsonJournal {
    fn session_opened(&self, session: &str, peer: &SocketAddr) {
        let mut e = JournalEntry::new(JournalEvent::Open, session);
        e.peer = Some(peer.to_string());
        self.add_entry(&e);
    }
    fn session_closed(&self, session: &str) {
        self.add_entry(&JournalEntry::new(JournalEvent::Close, session));
    }
    fn stored(&self, session: &str, file: &str, bytes: u64, seconds: f32) {
        let mut e = JournalEntry::new(JournalEvent::Upload, session);
        e.file = Some(file);
        e.bytes = Some(bytes);
        e.seconds = Some(seconds);
        self.add_entry(&e);
    }
    fn sent(&self, session: &str, file: &str, bytes: u64, seconds: f32) {
        let mut e = JournalEntry::new(JournalEvent::Download, session);
        e.file = Some(file);
        e.bytes = Some(bytes);
        e.seconds = Some(seconds);
        self.add_entry(&e);
    }
    fn listed(&self, session: &str, files: usize, total: u64) {
        let mut e = JournalEntry::new(JournalEvent::List, session);
        e.files = Some(files);
        e.bytes = Some(total);
        self.add_entry(&e);
    }
    fn removed(&self, session: &str, file: &str) {
        let mut e = JournalEntry::new(JournalEvent::Remove, session);
        e.file = Some(file);
        self.add_entry(&e);
    }
    fn failed(&self, session: &str, operation: &str, msg: &str) {
        let mut e = JournalEntry::new(JournalEvent::Error, session);
        e.error = Some(format!("{}: {}", operation, msg));
        self.add_entry(&e);
    }
}

/// No path means no journal
pub fn open_journal(path: Option<&Path>, format: JournalFormat) -> Result<Arc<dyn Journal>> {
    let journal: Arc<dyn Journal> = match (path, format) {
        (None, _) => Arc::new(NoopJournal),
        (Some(p), JournalFormat::Text) => Arc::new(TextJournal::new(p)?),
        (Some(p), JournalFormat::Jsonl) => Arc::new(JsonJournal::new(p)?),
    };
    Ok(journal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_text_journal_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("journal.log");
        let j = TextJournal::new(&path).unwrap();
        j.session_opened("1270015000", &"127.0.0.1:5000".parse().unwrap());
        j.stored("1270015000", "a.txt", 42, 0.5);
        j.session_closed("1270015000");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("OPEN session=1270015000 peer=127.0.0.1:5000"));
        assert!(lines[1].contains("UPLOAD session=1270015000 file=a.txt bytes=42"));
        assert!(lines[2].ends_with("CLOSE session=1270015000"));
    }

    #[test]
    fn test_json_journal_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let j = JsonJournal::new(&path).unwrap();
        j.listed("s1", 3, 900);
        j.failed("s1", "uploading", "short read");

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["event"], "list");
        assert_eq!(rows[0]["files"], 3);
        assert_eq!(rows[0]["bytes"], 900);
        assert!(rows[0].get("file").is_none());
        assert_eq!(rows[1]["event"], "error");
        assert_eq!(rows[1]["error"], "uploading: short read");
    }

    #[test]
    fn test_open_journal_by_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j.jsonl");
        let j = open_journal(Some(&path), JournalFormat::Jsonl).unwrap();
        j.removed("s", "gone.txt");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with('{'));
        assert!(text.contains("\"file\":\"gone.txt\""));

        assert!(open_journal(None, JournalFormat::Text).is_ok());
        assert!(!dir.path().join("j.log").exists());
    }
}
