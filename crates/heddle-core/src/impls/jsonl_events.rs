//! JsonlEventLog - JSON Lines のイベントログ
//!
//! # 実装詳細
//! - 1 イベント = 1 行、追記のみ
//! - append ごとに `sync_data` で永続化
//! - replay は最終行の途中書き込み（クラッシュ時）を読み飛ばし、ファイルからも切り詰める

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::domain::{PersistError, PoolEvent};
use crate::ports::EventLog;

pub struct JsonlEventLog {
    path: PathBuf,
    /// Serializes appends from the scheduler and recovery.
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&self) -> Result<File, PersistError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }

    /// Cut a torn tail off so the next append starts on a fresh line.
    fn truncate(&self, len: u64) -> Result<(), PersistError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// The last record parsed but its newline never reached the disk.
    fn terminate_last_line(&self) -> Result<(), PersistError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = self.open_for_append()?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }
}

impl EventLog for JsonlEventLog {
    fn append(&self, event: &PoolEvent) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = self.open_for_append()?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<PoolEvent>, PersistError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&[u8]> = raw.split(|b| *b == b'\n').collect();
        let last = lines
            .iter()
            .rposition(|line| !line.trim_ascii().is_empty())
            .map_or(0, |idx| idx + 1);
        let mut events = Vec::with_capacity(last);
        let mut offset = 0;

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            let start = offset;
            offset += line.len() + 1;
            if line.trim_ascii().is_empty() {
                continue;
            }
            match serde_json::from_slice::<PoolEvent>(line) {
                Ok(event) => events.push(event),
                Err(source) if line_no == last => {
                    warn!(line = line_no, error = %source, "dropping torn event log tail");
                    self.truncate(start as u64)?;
                    return Ok(events);
                }
                Err(source) => return Err(PersistError::Json { line: line_no, source }),
            }
        }

        if !raw.is_empty() && !raw.ends_with(b"\n") {
            self.terminate_last_line()?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, SlotId, TaskId, TaskSpec};
    use chrono::Utc;
    use ulid::Ulid;

    fn id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        assert!(log.replay().unwrap().is_empty());
    }

    #[test]
    fn appends_in_order_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        let task = id();

        log.append(&PoolEvent::submitted(Utc::now(), task, TaskSpec::new("t", ["a.ts"])))
            .unwrap();
        log.append(&PoolEvent::assigned(Utc::now(), SlotId::new(1), task, vec!["a.ts".into()]))
            .unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let kinds: Vec<EventKind> = log.replay().unwrap().iter().map(|e| e.event_kind).collect();
        assert_eq!(kinds, vec![EventKind::Submitted, EventKind::Assigned]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        log.append(&PoolEvent::completed(Utc::now(), SlotId::new(2), id()))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(br#"{"timestamp":"2026-01-"#).unwrap();

        let events = log.replay().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_kind, EventKind::Completed);
    }

    #[test]
    fn appends_after_a_torn_tail_start_on_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        log.append(&PoolEvent::completed(Utc::now(), SlotId::new(1), id()))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(br#"{"timestamp":"2026-01-"#).unwrap();
        drop(file);

        assert_eq!(log.replay().unwrap().len(), 1);
        log.append(&PoolEvent::completed(Utc::now(), SlotId::new(2), id()))
            .unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert_eq!(log.replay().unwrap().len(), 2);
    }

    #[test]
    fn record_without_newline_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("events.jsonl"));
        let line = serde_json::to_string(&PoolEvent::completed(Utc::now(), SlotId::new(1), id()))
            .unwrap();
        fs::write(log.path(), line).unwrap();

        assert_eq!(log.replay().unwrap().len(), 1);
        log.append(&PoolEvent::completed(Utc::now(), SlotId::new(2), id()))
            .unwrap();
        assert_eq!(log.replay().unwrap().len(), 2);
    }

    #[test]
    fn corruption_in_the_middle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "garbage\n").unwrap();
        let log = JsonlEventLog::new(&path);
        log.append(&PoolEvent::completed(Utc::now(), SlotId::new(2), id()))
            .unwrap();

        let err = log.replay().unwrap_err();
        assert!(matches!(err, PersistError::Json { line: 1, .. }));
    }
}
