use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use reqwest::Client;
use tokio::time::timeout;

use crate::{
    cli::{Command, ConsoleProgress, HistoryCommand, RecordsCommand},
    config::AppConfig,
    db::{self, local_storage::LocalStorage},
    domain::{HistoryItem, RecordId, ScanOutcome},
    history::{export, HistoryRecorder},
    infrastructure::{directories::ResolvedPaths, shutdown::Shutdown},
    report,
    scan::{
        extract::{domain_for_single_scan, read_csv_domains},
        ScanKind, ScanRunner,
    },
    store::{
        ChangeFeed, ChangeFilter, RealtimeFeed, RecordStore, RestRecordStore, WebhookTrigger,
    },
};

pub struct SentryApp {
    store: Arc<dyn RecordStore>,
    feed: Arc<dyn ChangeFeed>,
    runner: ScanRunner,
    history: HistoryRecorder,
    storage: LocalStorage,
    shutdown: Shutdown,
    timezone: Tz,
}

impl SentryApp {
    pub async fn initialize(
        config: AppConfig,
        paths: &ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let pool = db::init_pool(&paths.db_path).await?;
        let storage = LocalStorage::new(pool);
        let history = HistoryRecorder::new(storage.clone());

        let http_client = Client::builder()
            .user_agent(format!("url-sentry/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.supabase.request_timeout)
            .build()?;

        let store: Arc<dyn RecordStore> =
            Arc::new(RestRecordStore::new(http_client.clone(), &config.supabase));
        let feed: Arc<dyn ChangeFeed> = Arc::new(RealtimeFeed::new(&config.supabase)?);
        let trigger = Arc::new(WebhookTrigger::new(http_client, config.webhook.clone()));
        let runner = ScanRunner::new(store.clone(), feed.clone(), trigger, &config.scan);

        Ok(Self {
            store,
            feed,
            runner,
            history,
            storage,
            shutdown,
            timezone: report::parse_timezone(&config.timezone),
        })
    }

    pub async fn run(self, command: Command) -> Result<()> {
        let result = self.dispatch(command).await;
        if timeout(Duration::from_secs(5), self.storage.close())
            .await
            .is_err()
        {
            tracing::warn!(target: "db", "local storage did not close within 5s");
        }
        result
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::Scan { url } => self.scan_single(&url).await,
            Command::Bulk { file, output } => self.scan_bulk(&file, output.as_deref()).await,
            Command::History(cmd) => self.history(cmd).await,
            Command::Records(cmd) => self.records(cmd).await,
        }
    }

    async fn scan_single(&self, url: &str) -> Result<()> {
        let domain = domain_for_single_scan(url)?;
        let outcome = self.execute(ScanKind::Single, vec![domain]).await?;
        if let ScanOutcome::Single(result) = &outcome {
            print!("{}", report::render_result(result, self.timezone));
        }
        self.remember(outcome).await
    }

    async fn scan_bulk(&self, file: &Path, output: Option<&Path>) -> Result<()> {
        let domains = read_csv_domains(file).await?;
        tracing::info!(target: "scan", file = %file.display(), urls = domains.len(), "csv loaded");
        let outcome = self.execute(ScanKind::Bulk, domains).await?;
        if let ScanOutcome::Bulk(bulk) = &outcome {
            print!("{}", report::render_bulk(bulk, self.timezone));
            if let Some(path) = output {
                write_output(path, &export::bulk_csv(bulk)?).await?;
                eprintln!("Results written to {}", path.display());
            }
        }
        self.remember(outcome).await
    }

    async fn execute(&self, kind: ScanKind, domains: Vec<String>) -> Result<ScanOutcome> {
        let mut progress = ConsoleProgress::default();
        let mut listener = self.shutdown.listener();
        let outcome = self
            .runner
            .run(kind, domains, &mut progress, &mut listener)
            .await?;
        Ok(outcome)
    }

    async fn remember(&self, outcome: ScanOutcome) -> Result<()> {
        let item = HistoryItem::new(outcome.into(), Utc::now());
        if let Err(err) = self.history.record(item).await {
            // The scan itself succeeded; only the local log is affected.
            tracing::error!(target: "history", error = ?err, "failed to save scan to history");
        }
        Ok(())
    }

    async fn history(&self, command: HistoryCommand) -> Result<()> {
        match command {
            HistoryCommand::List => {
                let log = self.history.load().await?;
                print!("{}", report::render_history(log.items(), self.timezone));
            }
            HistoryCommand::Clear => {
                self.history.clear().await?;
                eprintln!("History cleared");
            }
            HistoryCommand::Export { output } => {
                let log = self.history.load().await?;
                if log.is_empty() {
                    eprintln!("No scan history to export");
                    return Ok(());
                }
                let csv = log.export_csv()?;
                match output {
                    Some(path) => {
                        write_output(&path, &csv).await?;
                        eprintln!("{} entries written to {}", log.len(), path.display());
                    }
                    None => print!("{csv}"),
                }
            }
        }
        Ok(())
    }

    async fn records(&self, command: RecordsCommand) -> Result<()> {
        match command {
            RecordsCommand::List { limit } => {
                let records = self.store.list_recent(limit).await?;
                print!("{}", report::render_records(&records, self.timezone));
            }
            RecordsCommand::Clear => {
                self.store.delete_all().await?;
                eprintln!("All records deleted");
            }
            RecordsCommand::Watch { ids } => self.watch(ids).await?,
        }
        Ok(())
    }

    async fn watch(&self, ids: Vec<RecordId>) -> Result<()> {
        let filter = ChangeFilter::everything().with_ids(ids);
        let mut subscription = self.feed.subscribe(filter).await?;
        let mut listener = self.shutdown.listener();
        eprintln!("Watching for changes; press Ctrl+C to stop");

        let result = loop {
            let item = tokio::select! {
                _ = listener.notified() => break Ok(()),
                item = subscription.next() => item,
            };
            match item {
                None => break Ok(()),
                Some(Err(err)) => break Err(err),
                Some(Ok(change)) => {
                    let line = match (&change.record, &change.old_id) {
                        (Some(record), _) => {
                            report::render_records(std::slice::from_ref(record), self.timezone)
                        }
                        (None, Some(id)) => format!("id={id}\n"),
                        (None, None) => "(no row data)\n".to_string(),
                    };
                    print!("{:<6} {}", change.kind.as_str(), line);
                }
            }
        };
        subscription.unsubscribe().await;
        if listener.is_triggered() {
            tracing::info!(target: "realtime", "watch stopped by interrupt");
        }
        result.context("change feed failed")
    }
}

async fn write_output(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
