use std::{sync::Arc, time::Duration};

use tokio::time::{timeout_at, Instant};

use crate::{
    config::ScanConfig,
    domain::ScanOutcome,
    infrastructure::shutdown::ShutdownListener,
    store::{ChangeFeed, ChangeFilter, RecordStore, RemoteError, ScanTrigger, Subscription},
};

use super::{
    materialize,
    progress::{dispatch, ProgressSnapshot, ScanSession, SessionEvent, Step},
    submit::submit,
    ScanError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Single,
    Bulk,
}

/// Receives progress of a running scan. Frontends implement what they need.
pub trait ProgressSink: Send {
    fn submitted(&mut self, _total: usize) {}

    fn progressed(&mut self, _snapshot: &ProgressSnapshot) {}

    fn finished(&mut self) {}
}

#[cfg(test)]
pub struct NullProgress;
#[cfg(test)]
impl ProgressSink for NullProgress {}

pub struct ScanRunner {
    store: Arc<dyn RecordStore>,
    feed: Arc<dyn ChangeFeed>,
    trigger: Arc<dyn ScanTrigger>,
    stall_timeout: Duration,
}

impl ScanRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        feed: Arc<dyn ChangeFeed>,
        trigger: Arc<dyn ScanTrigger>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            store,
            feed,
            trigger,
            stall_timeout: config.stall_timeout,
        }
    }

    /// Runs one scan session from submission to final results.
    pub async fn run(
        &self,
        kind: ScanKind,
        domains: Vec<String>,
        progress: &mut dyn ProgressSink,
        shutdown: &mut ShutdownListener,
    ) -> Result<ScanOutcome, ScanError> {
        if domains.is_empty() {
            return Err(ScanError::Validation("nothing to scan".into()));
        }
        tracing::info!(target: "scan", ?kind, total = domains.len(), "scan started");

        // Subscribe before the first insert so no early update can slip past.
        let mut subscription = self
            .feed
            .subscribe(ChangeFilter::updates())
            .await
            .map_err(ScanError::Subscription)?;

        let submitted =
            submit(self.store.as_ref(), self.trigger.as_ref(), &domains, shutdown).await;
        let entries = match submitted {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(target: "scan", error = %err, "submission abandoned");
                subscription.unsubscribe().await;
                return Err(err);
            }
        };

        let (session, _) = dispatch(ScanSession::idle(), SessionEvent::Submitted(entries));
        progress.submitted(session.total());

        let aggregated = self
            .aggregate(session, &mut subscription, progress, shutdown)
            .await;
        subscription.unsubscribe().await;
        let session = aggregated?;
        progress.finished();

        let outcome = tokio::select! {
            biased;
            _ = shutdown.notified() => Err(ScanError::Cancelled),
            outcome = materialize::fetch_results(self.store.as_ref(), &session, kind) => outcome,
        }?;
        tracing::info!(
            target: "scan",
            results = outcome.results().len(),
            "scan complete"
        );
        Ok(outcome)
    }

    async fn aggregate(
        &self,
        mut session: ScanSession,
        subscription: &mut Subscription,
        progress: &mut dyn ProgressSink,
        shutdown: &mut ShutdownListener,
    ) -> Result<ScanSession, ScanError> {
        let mut deadline = Instant::now() + self.stall_timeout;
        loop {
            let item = tokio::select! {
                _ = shutdown.notified() => return Err(abandon(session, ScanError::Cancelled)),
                item = timeout_at(deadline, subscription.next()) => item,
            };
            let change = match item {
                Err(_) => return Err(abandon(session, ScanError::TimedOut(self.stall_timeout))),
                Ok(None) => {
                    return Err(abandon(session, ScanError::Subscription(RemoteError::Closed)))
                }
                Ok(Some(Err(err))) => return Err(abandon(session, ScanError::Subscription(err))),
                Ok(Some(Ok(change))) => change,
            };
            let Some(record) = change.record else {
                continue;
            };

            let id = record.id;
            let (next, step) = dispatch(
                session,
                SessionEvent::Updated {
                    id: id.clone(),
                    checks: record.number_of_checks,
                },
            );
            session = next;
            match step {
                Step::Advanced => {
                    deadline = Instant::now() + self.stall_timeout;
                    let snapshot = session.snapshot();
                    tracing::debug!(
                        target: "scan",
                        domain = session.domain_of(&id).unwrap_or("-"),
                        completed = snapshot.completed,
                        total = snapshot.total,
                        percent = snapshot.percent,
                        "progress"
                    );
                    progress.progressed(&snapshot);
                }
                Step::Completed => {
                    progress.progressed(&session.snapshot());
                    return Ok(session);
                }
                // Updates never fail a session.
                Step::Ignored | Step::Failed(_) => {}
            }
        }
    }
}

fn abandon(session: ScanSession, err: ScanError) -> ScanError {
    let (session, _) = dispatch(session, SessionEvent::Failed(err.kind()));
    tracing::warn!(
        target: "scan",
        state = ?session.state(),
        completed = session.completed(),
        total = session.total(),
        error = %err,
        "scan session abandoned"
    );
    err
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use tokio::sync::mpsc;

    use crate::{
        domain::{DomainRecord, RecordId, ScanStatus},
        store::{
            ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, FeedItem, RecordStore,
            RemoteError, ScanTrigger, Subscription,
        },
    };

    pub type Journal = Arc<Mutex<Vec<&'static str>>>;

    fn rejected(operation: &'static str) -> RemoteError {
        RemoteError::Status {
            operation,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        }
    }

    pub fn update_event(record: DomainRecord) -> FeedItem {
        Ok(ChangeEvent {
            kind: ChangeKind::Update,
            old_id: Some(record.id.clone()),
            record: Some(record),
        })
    }

    #[derive(Default)]
    pub struct FakeStore {
        rows: Mutex<Vec<DomainRecord>>,
        next_id: AtomicI64,
        fail_insert: Option<String>,
        hang_insert: Option<String>,
        fail_fetch: bool,
        hang_fetch: bool,
        journal: Journal,
    }

    impl FakeStore {
        pub fn with_journal(journal: Journal) -> Self {
            Self {
                journal,
                ..Self::default()
            }
        }

        pub fn failing_insert_for(mut self, domain: &str) -> Self {
            self.fail_insert = Some(domain.to_string());
            self
        }

        pub fn failing_fetch(mut self) -> Self {
            self.fail_fetch = true;
            self
        }

        /// Inserts of `domain` never answer.
        pub fn hanging_insert_for(mut self, domain: &str) -> Self {
            self.hang_insert = Some(domain.to_string());
            self
        }

        pub fn hanging_fetch(mut self) -> Self {
            self.hang_fetch = true;
            self
        }

        pub fn len(&self) -> usize {
            self.rows.lock().len()
        }

        /// Plays the scorer: rewrites a row and returns the new image.
        pub fn bump(&self, id: &RecordId, checks: u32, status: &str, score: f64) -> DomainRecord {
            let mut rows = self.rows.lock();
            let row = rows
                .iter_mut()
                .find(|row| &row.id == id)
                .expect("bumped row exists");
            row.number_of_checks = checks;
            row.status = ScanStatus::from_store_label(status);
            row.spam_score = score;
            row.clone()
        }
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn insert(&self, domain: &str) -> Result<DomainRecord, RemoteError> {
            self.journal.lock().push("insert");
            if self.fail_insert.as_deref() == Some(domain) {
                return Err(rejected("insert"));
            }
            if self.hang_insert.as_deref() == Some(domain) {
                std::future::pending::<()>().await;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let record = DomainRecord {
                id: RecordId::Int(id),
                domain: domain.to_string(),
                spam_score: 0.0,
                status: ScanStatus::Clean,
                number_of_checks: 0,
                critical_urls: None,
                message: None,
                created_at: Some(chrono::Utc::now()),
            };
            self.rows.lock().push(record.clone());
            Ok(record)
        }

        async fn fetch_by_ids(&self, ids: &[RecordId]) -> Result<Vec<DomainRecord>, RemoteError> {
            self.journal.lock().push("fetch");
            if self.fail_fetch {
                return Err(rejected("select"));
            }
            if self.hang_fetch {
                std::future::pending::<()>().await;
            }
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|row| ids.contains(&row.id))
                .cloned()
                .collect())
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<DomainRecord>, RemoteError> {
            Ok(self.rows.lock().iter().rev().take(limit).cloned().collect())
        }

        async fn delete_by_ids(&self, ids: &[RecordId]) -> Result<(), RemoteError> {
            self.rows.lock().retain(|row| !ids.contains(&row.id));
            Ok(())
        }

        async fn delete_all(&self) -> Result<(), RemoteError> {
            self.rows.lock().clear();
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    pub struct FakeFeed {
        sender: Arc<Mutex<Option<mpsc::Sender<FeedItem>>>>,
        fail: bool,
        journal: Journal,
    }

    impl FakeFeed {
        pub fn with_journal(journal: Journal) -> Self {
            Self {
                journal,
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sender(&self) -> Option<mpsc::Sender<FeedItem>> {
            self.sender.lock().clone()
        }

        /// True once the subscriber side has gone away.
        pub fn torn_down(&self) -> bool {
            self.sender
                .lock()
                .as_ref()
                .map_or(false, |sender| sender.is_closed())
        }
    }

    #[async_trait]
    impl ChangeFeed for FakeFeed {
        async fn subscribe(&self, _filter: ChangeFilter) -> Result<Subscription, RemoteError> {
            self.journal.lock().push("subscribe");
            if self.fail {
                return Err(RemoteError::Rejected("join refused".into()));
            }
            let (tx, rx) = mpsc::channel(64);
            *self.sender.lock() = Some(tx);
            Ok(Subscription::from_channel(rx))
        }
    }

    #[derive(Default)]
    pub struct FakeTrigger {
        calls: Mutex<Vec<(RecordId, String)>>,
        fail_domain: Option<String>,
        hang: bool,
        journal: Journal,
        scorer: Option<(Arc<FakeStore>, FakeFeed)>,
    }

    impl FakeTrigger {
        pub fn with_journal(journal: Journal) -> Self {
            Self {
                journal,
                ..Self::default()
            }
        }

        pub fn failing_for(mut self, domain: &str) -> Self {
            self.fail_domain = Some(domain.to_string());
            self
        }

        /// Records each call, then never answers.
        pub fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        /// Scores every row to completion inside the trigger call itself, before
        /// the caller has even seen the insert results.
        pub fn instant_scorer(store: Arc<FakeStore>, feed: FakeFeed) -> Self {
            Self {
                scorer: Some((store, feed)),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<(RecordId, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ScanTrigger for FakeTrigger {
        async fn notify(&self, record_id: &RecordId, domain: &str) -> Result<(), RemoteError> {
            self.journal.lock().push("trigger");
            self.calls.lock().push((record_id.clone(), domain.to_string()));
            if self.fail_domain.as_deref() == Some(domain) {
                return Err(rejected("webhook"));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some((store, feed)) = &self.scorer {
                let sender = feed.sender().expect("subscribed before trigger");
                for checks in 1..=3 {
                    let record = store.bump(record_id, checks, "High Risk", 8.5);
                    sender
                        .send(update_event(record))
                        .await
                        .expect("subscriber alive");
                }
            }
            Ok(())
        }
    }
}
