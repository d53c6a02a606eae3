//! Local log of completed scans, newest first, capped at [`HISTORY_LIMIT`] entries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{db::local_storage::LocalStorage, domain::HistoryItem};

pub mod export;

pub const HISTORY_LIMIT: usize = 50;
pub const HISTORY_KEY: &str = "urlSentryHistory";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    items: Vec<HistoryItem>,
}

impl HistoryLog {
    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Prepends `item`, dropping the oldest entries beyond the cap.
    pub fn record(&mut self, item: HistoryItem) {
        self.items.insert(0, item);
        self.items.truncate(HISTORY_LIMIT);
    }

    pub fn export_csv(&self) -> Result<String> {
        export::history_csv(&self.items)
    }
}

/// Persists the history log as JSON under [`HISTORY_KEY`].
#[derive(Clone)]
pub struct HistoryRecorder {
    storage: LocalStorage,
}

impl HistoryRecorder {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Result<HistoryLog> {
        let Some(raw) = self.storage.get(HISTORY_KEY).await? else {
            return Ok(HistoryLog::default());
        };
        match serde_json::from_str(&raw) {
            Ok(log) => Ok(log),
            Err(err) => {
                tracing::warn!(target: "history", error = %err, "stored history unreadable; starting empty");
                Ok(HistoryLog::default())
            }
        }
    }

    pub async fn record(&self, item: HistoryItem) -> Result<HistoryLog> {
        let mut log = self.load().await?;
        let id = item.id.clone();
        log.record(item);
        self.save(&log).await?;
        tracing::info!(target: "history", id = %id, entries = log.len(), "scan recorded");
        Ok(log)
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(HISTORY_KEY).await?;
        tracing::info!(target: "history", "history cleared");
        Ok(())
    }

    async fn save(&self, log: &HistoryLog) -> Result<()> {
        let raw = serde_json::to_string(log).context("failed to encode history")?;
        self.storage.set(HISTORY_KEY, &raw).await
    }
}
