//! Agent memory: day-bucketed logs for recent narration and one durable
//! knowledge document shared by all agents.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append_log(&self, content: &str, agent_id: &str) -> Result<()>;

    /// Log buckets for the last `days` days (today included), most recent
    /// first, each headed `--- YYYY-MM-DD ---`. Days without entries are skipped.
    async fn recent_logs(&self, days: u32) -> Result<Vec<String>>;

    async fn append_knowledge(&self, content: &str) -> Result<()>;

    async fn read_knowledge(&self) -> Result<String>;
}

fn log_entry(at: DateTime<Utc>, agent_id: &str, content: &str) -> String {
    format!(
        "\n[{}] [{}] {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        agent_id,
        content
    )
}

fn knowledge_entry(at: DateTime<Utc>, content: &str) -> String {
    format!("\n- [{}] {}", at.to_rfc3339_opts(SecondsFormat::Millis, true), content)
}

fn bucket_header(day: NaiveDate, body: &str) -> String {
    format!("--- {} ---\n{}", day.format("%Y-%m-%d"), body)
}

fn recent_days(today: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..days as i64).map(move |offset| today - Duration::days(offset))
}

/// Files under a base directory: `logs/YYYY-MM-DD.md` and `MEMORY.md`.
pub struct FileMemoryStore {
    logs_dir: PathBuf,
    knowledge_file: PathBuf,
}

impl FileMemoryStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let logs_dir = base_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create memory directory {}", logs_dir.display()))?;

        Ok(Self {
            logs_dir,
            knowledge_file: base_dir.join("MEMORY.md"),
        })
    }

    fn log_file(&self, day: NaiveDate) -> PathBuf {
        self.logs_dir.join(format!("{}.md", day.format("%Y-%m-%d")))
    }

    async fn append(path: &Path, text: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn append_log_at(&self, at: DateTime<Utc>, content: &str, agent_id: &str) -> Result<()> {
        Self::append(&self.log_file(at.date_naive()), &log_entry(at, agent_id, content)).await
    }

    async fn recent_logs_from(&self, today: NaiveDate, days: u32) -> Result<Vec<String>> {
        let mut logs = Vec::new();
        for day in recent_days(today, days) {
            match tokio::fs::read_to_string(self.log_file(day)).await {
                Ok(body) => logs.push(bucket_header(day, &body)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to read log bucket"),
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn append_log(&self, content: &str, agent_id: &str) -> Result<()> {
        self.append_log_at(Utc::now(), content, agent_id).await
    }

    async fn recent_logs(&self, days: u32) -> Result<Vec<String>> {
        self.recent_logs_from(Utc::now().date_naive(), days).await
    }

    async fn append_knowledge(&self, content: &str) -> Result<()> {
        Self::append(&self.knowledge_file, &knowledge_entry(Utc::now(), content)).await
    }

    async fn read_knowledge(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.knowledge_file).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).context("Failed to read knowledge file"),
        }
    }
}

/// Process-local store, used by tests and when no data directory is wanted.
#[derive(Default)]
pub struct InMemoryStore {
    logs: Mutex<BTreeMap<NaiveDate, String>>,
    knowledge: Mutex<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_log_at(&self, at: DateTime<Utc>, content: &str, agent_id: &str) {
        self.logs
            .lock()
            .entry(at.date_naive())
            .or_default()
            .push_str(&log_entry(at, agent_id, content));
    }

    fn recent_logs_from(&self, today: NaiveDate, days: u32) -> Vec<String> {
        let logs = self.logs.lock();
        recent_days(today, days)
            .filter_map(|day| logs.get(&day).map(|body| bucket_header(day, body)))
            .collect()
    }

    /// Every log line written so far, oldest bucket first.
    pub fn all_logs(&self) -> String {
        self.logs.lock().values().cloned().collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append_log(&self, content: &str, agent_id: &str) -> Result<()> {
        self.append_log_at(Utc::now(), content, agent_id);
        Ok(())
    }

    async fn recent_logs(&self, days: u32) -> Result<Vec<String>> {
        Ok(self.recent_logs_from(Utc::now().date_naive(), days))
    }

    async fn append_knowledge(&self, content: &str) -> Result<()> {
        self.knowledge
            .lock()
            .push_str(&knowledge_entry(Utc::now(), content));
        Ok(())
    }

    async fn read_knowledge(&self) -> Result<String> {
        Ok(self.knowledge.lock().clone())
    }
}
