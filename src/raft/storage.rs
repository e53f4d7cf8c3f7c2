//! Durable storage for the replicated log and the node's hard state.
//!
//! Layout of the data directory:
//! - `raft.log`: one JSON object per line, `{"term": <int>, "data": <string>}`
//! - `state.json`: current term, vote and commit index
//!
//! Every write replaces the whole file: the new contents go to a temporary
//! file that is synced and then renamed over the old one, after which the
//! directory is synced so the rename survives a crash.
//!
//! Writes are blocking and run while the caller holds the node state lock.
//! A vote or an append is only acknowledged after it is on disk.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::raft::state::{HardState, LogEntry};

const LOG_FILE: &str = "raft.log";
const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Read the whole log. A missing file is an empty log.
    pub fn load_log(&self) -> Result<Vec<LogEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut entries: Vec<LogEntry> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Rewrite the log file from `entries`.
    pub fn save_log(&self, entries: &[LogEntry]) -> Result<()> {
        let mut buf = Vec::with_capacity(entries.len() * 32);
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        self.replace(&self.log_path(), &buf)
    }

    pub fn load_hard_state(&self) -> Result<HardState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(HardState {
                commit_index: -1,
                ..HardState::default()
            });
        }
        let contents = fs::read(&path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    pub fn save_hard_state(&self, hard: &HardState) -> Result<()> {
        let json = serde_json::to_vec_pretty(hard)?;
        self.replace(&self.state_path(), &json)
    }

    fn replace(&self, target: &Path, contents: &[u8]) -> Result<()> {
        let temp = target.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp)?);
            writer.write_all(contents)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp, target)?;
        self.sync_dir()
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_dir(&self) -> Result<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_files_load_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("node")).unwrap();

        assert!(store.load_log().unwrap().is_empty());
        let hard = store.load_hard_state().unwrap();
        assert_eq!(hard.current_term, 0);
        assert_eq!(hard.voted_for, None);
        assert_eq!(hard.commit_index, -1);
    }

    #[test]
    fn log_is_one_json_object_per_line() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        store
            .save_log(&[LogEntry::new(1, "enroll:alice"), LogEntry::new(2, "grade:42")])
            .unwrap();

        let raw = fs::read_to_string(store.log_path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["term"], 1);
        assert_eq!(first["data"], "enroll:alice");
    }

    #[test]
    fn save_rewrites_after_truncation() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        let mut log = vec![
            LogEntry::new(1, "a"),
            LogEntry::new(1, "b"),
            LogEntry::new(1, "c"),
        ];
        store.save_log(&log).unwrap();

        log.truncate(1);
        log.push(LogEntry::new(2, "d"));
        store.save_log(&log).unwrap();

        assert_eq!(store.load_log().unwrap(), log);
        assert!(!store.log_path().with_extension("tmp").exists());
    }

    #[test]
    fn saves_leave_only_final_files() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("node")).unwrap();

        store.save_log(&[LogEntry::new(1, "enroll:alice")]).unwrap();
        store
            .save_hard_state(&HardState {
                current_term: 1,
                voted_for: None,
                commit_index: 0,
            })
            .unwrap();

        let mut names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![LOG_FILE.to_string(), STATE_FILE.to_string()]);

        let reopened = LogStore::open(store.dir()).unwrap();
        assert_eq!(reopened.load_log().unwrap(), vec![LogEntry::new(1, "enroll:alice")]);
        assert_eq!(reopened.load_hard_state().unwrap().commit_index, 0);
    }

    #[test]
    fn save_fails_when_directory_is_gone() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("node")).unwrap();
        fs::remove_dir_all(store.dir()).unwrap();

        assert!(store.save_log(&[LogEntry::new(1, "enroll:alice")]).is_err());
        assert!(store.save_hard_state(&HardState::default()).is_err());
    }

    #[test]
    fn reads_log_written_by_other_tools() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        fs::write(
            store.log_path(),
            "{\"term\": 1, \"data\": \"x\"}\n\n{\"term\": 3, \"data\": \"y\"}\n",
        )
        .unwrap();

        let log = store.load_log().unwrap();
        assert_eq!(log, vec![LogEntry::new(1, "x"), LogEntry::new(3, "y")]);
    }

    #[test]
    fn corrupt_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        fs::write(store.log_path(), "{\"term\": 1, \"da").unwrap();

        assert!(store.load_log().is_err());
    }

    #[test]
    fn hard_state_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let hard = HardState {
            current_term: 4,
            voted_for: Some("lms_server_2".into()),
            commit_index: 9,
        };

        store.save_hard_state(&hard).unwrap();
        assert_eq!(store.load_hard_state().unwrap(), hard);
    }
}
