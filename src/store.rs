use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::benchmark::BenchmarkRun;

/// A persisted run with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub id: u64,
    #[serde(flatten)]
    pub run: BenchmarkRun,
}

/// History listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RecordId {
    id: u64,
}

/// Append-only run history, one JSON object per line. Ids start at 1 and
/// only grow; nothing is ever rewritten or deleted.
#[derive(Debug, Clone)]
pub struct RunStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl RunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, run: &BenchmarkRun) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let id = self.last_id().await? + 1;

        let mut line = serde_json::to_string(&StoredRun {
            id,
            run: run.clone(),
        })?;
        line.push('\n');

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Stored run {} in {}", id, self.path.display());
        Ok(id)
    }

    /// Every readable run, oldest first. A missing file is an empty store.
    pub async fn load_all(&self) -> Result<Vec<StoredRun>> {
        let mut runs = Vec::new();
        for line in self.read_records().await? {
            match serde_json::from_str::<StoredRun>(&line) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("Skipping unreadable run record: {}", e),
            }
        }
        Ok(runs)
    }

    // Highest id taken by any record, readable or not. A record whose id
    // cannot be recovered is assumed to hold its line position.
    async fn last_id(&self) -> Result<u64> {
        let last = self
            .read_records()
            .await?
            .iter()
            .enumerate()
            .map(|(position, line)| {
                serde_json::from_str::<RecordId>(line)
                    .map(|record| record.id)
                    .unwrap_or(position as u64 + 1)
            })
            .max()
            .unwrap_or(0);
        Ok(last)
    }

    // Non-empty lines of the history file.
    async fn read_records(&self) -> Result<Vec<String>> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                records.push(line);
            }
        }
        Ok(records)
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<RunEntry>> {
        let mut entries: Vec<RunEntry> = self
            .load_all()
            .await?
            .into_iter()
            .map(|stored| RunEntry {
                id: stored.id,
                started_at: stored.run.started_at,
                finished_at: stored.run.finished_at,
            })
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(entries)
    }

    pub async fn latest(&self) -> Result<Option<StoredRun>> {
        Ok(self.load_all().await?.into_iter().max_by_key(|r| r.id))
    }

    #[cfg(test)]
    pub(crate) async fn hold_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn get(&self, id: u64) -> Result<Option<StoredRun>> {
        Ok(self.load_all().await?.into_iter().find(|r| r.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::RoundResults;

    fn run(prompt: &str) -> BenchmarkRun {
        let now = Utc::now();
        BenchmarkRun {
            started_at: now,
            finished_at: now,
            prompt: prompt.to_string(),
            rounds: vec![RoundResults {
                round: 1,
                results: Vec::new(),
            }],
            summary: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("history/results.jsonl"));

        assert!(store.latest().await.unwrap().is_none());
        assert_eq!(store.append(&run("one")).await.unwrap(), 1);
        assert_eq!(store.append(&run("two")).await.unwrap(), 2);

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, 2);
        assert_eq!(latest.run.prompt, "two");

        let first = store.get(1).await.unwrap().unwrap();
        assert_eq!(first.run.prompt, "one");
        assert_eq!(first.run.rounds.len(), 1);
        assert!(store.get(3).await.unwrap().is_none());

        let ids: Vec<_> = store.list().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let store = RunStore::new(&path);
        store.append(&run("kept")).await.unwrap();

        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{not json}\n\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let runs = store.load_all().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(store.append(&run("next")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_last_record_keeps_its_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let store = RunStore::new(&path);
        store.append(&run("one")).await.unwrap();

        // Id survives even though the record no longer parses as a run
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"id\": 7, \"prompt\": 1}\n");
        tokio::fs::write(&path, contents).await.unwrap();

        assert_eq!(store.load_all().await.unwrap().len(), 1);
        assert_eq!(store.append(&run("next")).await.unwrap(), 8);
        assert_eq!(store.latest().await.unwrap().unwrap().run.prompt, "next");
    }
}
