//! Adapters for the hosted services the scanner talks to: the domains table (REST),
//! its change notifications (websocket) and the scoring webhook.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

use crate::domain::{DomainRecord, RecordId};

pub mod realtime;
pub mod rest;
pub mod webhook;

pub use realtime::RealtimeFeed;
pub use rest::RestRecordStore;
pub use webhook::WebhookTrigger;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("insert for {0} returned no row")]
    EmptyInsert(String),
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("no subscription acknowledgement within {0:?}")]
    JoinTimeout(Duration),
    #[error("change feed closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    All,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::All => "*",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            "*" => Some(ChangeKind::All),
            _ => None,
        }
    }
}

/// Which change notifications a subscription should receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub kind: ChangeKind,
    pub ids: Vec<RecordId>,
}

impl ChangeFilter {
    pub fn updates() -> Self {
        Self {
            kind: ChangeKind::Update,
            ids: Vec::new(),
        }
    }

    pub fn everything() -> Self {
        Self {
            kind: ChangeKind::All,
            ids: Vec::new(),
        }
    }

    pub fn with_ids(mut self, ids: Vec<RecordId>) -> Self {
        self.ids = ids;
        self
    }

    /// Server-side row filter in PostgREST syntax, if any.
    pub fn row_filter(&self) -> Option<String> {
        match self.ids.as_slice() {
            [] => None,
            [id] => Some(format!("id=eq.{}", id)),
            ids => Some(format!("id=in.({})", id_list(ids))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// New row image; absent for deletes.
    pub record: Option<DomainRecord>,
    pub old_id: Option<RecordId>,
}

pub type FeedItem = Result<ChangeEvent, RemoteError>;

/// A live change subscription. Dropping it aborts the background reader; `unsubscribe`
/// additionally tells the server to leave the channel.
pub struct Subscription {
    events: mpsc::Receiver<FeedItem>,
    teardown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        events: mpsc::Receiver<FeedItem>,
        teardown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            teardown: Some(teardown),
            task: Some(task),
        }
    }

    /// Subscription fed by someone else through a channel, with nothing to tear down.
    #[cfg(test)]
    pub fn from_channel(events: mpsc::Receiver<FeedItem>) -> Self {
        Self {
            events,
            teardown: None,
            task: None,
        }
    }

    pub async fn next(&mut self) -> Option<FeedItem> {
        self.events.recv().await
    }

    pub async fn unsubscribe(mut self) {
        // Teardown first: the reader must see it before it sees a closed channel.
        if let Some(teardown) = self.teardown.take() {
            let _ = teardown.send(());
        }
        self.events.close();
        if let Some(mut task) = self.task.take() {
            if timeout(Duration::from_secs(3), &mut task).await.is_err() {
                tracing::warn!(target: "realtime", "channel leave did not finish; aborting reader");
                task.abort();
            }
        }
        tracing::debug!(target: "realtime", "subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates one pending row and returns it with its assigned id.
    async fn insert(&self, domain: &str) -> Result<DomainRecord, RemoteError>;
    async fn fetch_by_ids(&self, ids: &[RecordId]) -> Result<Vec<DomainRecord>, RemoteError>;
    /// Newest rows first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<DomainRecord>, RemoteError>;
    async fn delete_by_ids(&self, ids: &[RecordId]) -> Result<(), RemoteError>;
    async fn delete_all(&self) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Resolves once the server has acknowledged the subscription.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, RemoteError>;
}

#[async_trait]
pub trait ScanTrigger: Send + Sync {
    async fn notify(&self, record_id: &RecordId, domain: &str) -> Result<(), RemoteError>;
}

pub(crate) fn id_list(ids: &[RecordId]) -> String {
    ids.iter()
        .map(RecordId::filter_literal)
        .collect::<Vec<_>>()
        .join(",")
}
