//! Append-only JSON index of downloaded videos.
//!
//! The file is a pretty-printed array of `{filename, timestamp}` objects kept
//! in insertion order. Readers re-sort; the writer never reorders, validates
//! or deduplicates.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;

/// Local wall-clock time, second precision, no offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub filename: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct VideoIndex {
    path: PathBuf,
}

impl VideoIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `filename` stamped with the current local time.
    pub fn record(&self, filename: &str) -> Result<IndexEntry> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.record_at(filename, timestamp)
    }

    /// Read-modify-write of the whole array. Single writer only: two
    /// processes recording at once can still lose an entry.
    pub fn record_at(&self, filename: &str, timestamp: impl Into<String>) -> Result<IndexEntry> {
        let entry = IndexEntry {
            filename: filename.to_owned(),
            timestamp: timestamp.into(),
        };
        let mut values = self.read_array()?;
        values.push(serde_json::to_value(&entry)?);
        self.write_array(&values)?;
        debug!(
            index = %self.path.display(),
            filename = %entry.filename,
            total = values.len(),
            "recorded video"
        );
        Ok(entry)
    }

    /// Entries in file order. Elements that are not `{filename, timestamp}`
    /// objects are skipped.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let values = self.read_array()?;
        let mut entries = Vec::with_capacity(values.len());
        for (position, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<IndexEntry>(value) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    index = %self.path.display(),
                    position,
                    error = %err,
                    "skipping malformed index entry"
                ),
            }
        }
        Ok(entries)
    }

    /// Missing, empty and corrupt files all read as an empty array.
    fn read_array(&self) -> Result<Vec<Value>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if content.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }

        // Bytes, not a String: invalid UTF-8 is just another corrupt index.
        match serde_json::from_slice::<Value>(&content) {
            Ok(Value::Array(values)) => Ok(values),
            Ok(_) => {
                warn!(index = %self.path.display(), "index is not a JSON array; starting fresh");
                Ok(Vec::new())
            }
            Err(err) => {
                warn!(index = %self.path.display(), error = %err, "index is corrupt; starting fresh");
                Ok(Vec::new())
            }
        }
    }

    /// Writes to a sibling temp file and renames it over the index so a crash
    /// never leaves a truncated array behind.
    fn write_array(&self, values: &[Value]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut staged = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut staged, values)?;
        staged.write_all(b"\n")?;
        staged.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))?;
        }
        staged.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn index_in(dir: &Path) -> VideoIndex {
        VideoIndex::new(dir.join("index.json"))
    }

    #[test]
    fn missing_empty_or_corrupt_index_yields_single_entry() {
        let initials: [Option<&[u8]>; 6] = [
            None,
            Some(b""),
            Some(b"  \n"),
            Some(b"{not json"),
            Some(b"{\"a\":1}"),
            Some(&[0xff, 0xfe, b'[', 0x80]),
        ];
        for initial in initials {
            let dir = tempdir().unwrap();
            let index = index_in(dir.path());
            if let Some(content) = initial {
                fs::write(index.path(), content).unwrap();
            }

            index.record_at("abc.mp4", "2024-01-01T10:00:00").unwrap();

            let entries = index.entries().unwrap();
            assert_eq!(
                entries,
                vec![IndexEntry {
                    filename: "abc.mp4".into(),
                    timestamp: "2024-01-01T10:00:00".into(),
                }],
                "initial content {initial:?}"
            );
        }
    }

    #[test]
    fn record_appends_in_insertion_order() {
        let dir = tempdir().unwrap();
        let index = index_in(dir.path());
        index.record_at("b.mp4", "2024-01-02T00:00:00").unwrap();
        index.record_at("a.mp4", "2024-01-01T00:00:00").unwrap();
        index.record_at("a.mp4", "2024-01-03T00:00:00").unwrap();

        let names: Vec<_> = index
            .entries()
            .unwrap()
            .into_iter()
            .map(|entry| entry.filename)
            .collect();
        assert_eq!(names, ["b.mp4", "a.mp4", "a.mp4"]);
    }

    #[test]
    fn file_is_a_pretty_json_array() {
        let dir = tempdir().unwrap();
        let index = index_in(dir.path());
        index.record_at("abc.mp4", "2024-01-01T10:00:00").unwrap();

        let raw = fs::read_to_string(index.path()).unwrap();
        assert!(raw.starts_with("[\n  {"));
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{ "filename": "abc.mp4", "timestamp": "2024-01-01T10:00:00" }])
        );
    }

    #[test]
    fn record_uses_second_precision_local_time() {
        let dir = tempdir().unwrap();
        let entry = index_in(dir.path()).record("now.mp4").unwrap();
        assert!(
            chrono::NaiveDateTime::parse_from_str(&entry.timestamp, TIMESTAMP_FORMAT).is_ok(),
            "{}",
            entry.timestamp
        );
    }

    #[test]
    fn unknown_elements_survive_writes_but_not_reads() {
        let dir = tempdir().unwrap();
        let index = index_in(dir.path());
        fs::write(
            index.path(),
            r#"[{"filename": "old.mp4", "timestamp": "2023-01-01T00:00:00", "note": "kept"}, 42]"#,
        )
        .unwrap();

        index.record_at("new.mp4", "2024-01-01T00:00:00").unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(index.path()).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 3);
        assert_eq!(raw[0]["note"], "kept");

        let entries = index.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].filename, "new.mp4");
    }
}
