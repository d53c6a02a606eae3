use futures::{stream, Stream, StreamExt};

use crate::{
    domain::RecordId,
    infrastructure::shutdown::ShutdownListener,
    store::{RecordStore, RemoteError, ScanTrigger},
};

use super::ScanError;

/// Most inserts (and later, triggers) in flight at once for one batch.
pub const SUBMIT_CONCURRENCY: usize = 16;

/// Creates one pending row per domain, then pings the scorer for each of them.
///
/// All-or-nothing: if any insert or trigger fails, or shutdown fires before both
/// phases are done, the rows this call created are deleted again before the error
/// is returned. Returned pairs keep input order.
pub async fn submit(
    store: &dyn RecordStore,
    trigger: &dyn ScanTrigger,
    domains: &[String],
    shutdown: &mut ShutdownListener,
) -> Result<Vec<(RecordId, String)>, ScanError> {
    let inserts = stream::iter(domains.iter().enumerate())
        .map(|(index, domain)| async move { (index, store.insert(domain).await) })
        .buffer_unordered(SUBMIT_CONCURRENCY);
    let mut inserted = Vec::with_capacity(domains.len());
    let finished = drain(inserts, shutdown, &mut inserted).await;
    inserted.sort_by_key(|(index, _)| *index);

    let mut entries = Vec::with_capacity(domains.len());
    let mut first_error: Option<(String, RemoteError)> = None;
    for (index, outcome) in inserted {
        let domain = &domains[index];
        match outcome {
            Ok(record) => entries.push((record.id, domain.clone())),
            Err(err) => {
                tracing::error!(target: "scan", domain = %domain, error = %err, "record creation failed");
                first_error.get_or_insert((format!("could not create record for {domain}"), err));
            }
        }
    }
    if !finished {
        tracing::warn!(
            target: "scan",
            created = entries.len(),
            total = domains.len(),
            "submission interrupted; inserts still in flight may land unseen"
        );
        rollback(store, &entries).await;
        return Err(ScanError::Cancelled);
    }
    if let Some((reason, source)) = first_error {
        rollback(store, &entries).await;
        return Err(ScanError::Submission { reason, source });
    }
    tracing::info!(target: "scan", total = entries.len(), "pending records created");

    let triggers = stream::iter(entries.iter())
        .map(|(id, domain)| async move { (id, domain, trigger.notify(id, domain).await) })
        .buffer_unordered(SUBMIT_CONCURRENCY);
    let mut notified = Vec::with_capacity(entries.len());
    if !drain(triggers, shutdown, &mut notified).await {
        tracing::warn!(target: "scan", total = entries.len(), "submission interrupted while triggering");
        rollback(store, &entries).await;
        return Err(ScanError::Cancelled);
    }

    let mut failed = 0usize;
    let mut first_error: Option<RemoteError> = None;
    for (id, domain, outcome) in notified {
        if let Err(err) = outcome {
            tracing::error!(target: "scan", record = %id, domain = %domain, error = %err, "trigger failed");
            failed += 1;
            first_error.get_or_insert(err);
        }
    }
    if let Some(source) = first_error {
        rollback(store, &entries).await;
        return Err(ScanError::Submission {
            reason: format!("{failed} of {} scorer triggers failed", entries.len()),
            source,
        });
    }

    Ok(entries)
}

/// Collects every item of `tasks` into `out`. Returns false if shutdown fired first.
async fn drain<T>(
    tasks: impl Stream<Item = T>,
    shutdown: &mut ShutdownListener,
    out: &mut Vec<T>,
) -> bool {
    tokio::pin!(tasks);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => return false,
            next = tasks.next() => match next {
                Some(item) => out.push(item),
                None => return true,
            },
        }
    }
}

async fn rollback(store: &dyn RecordStore, entries: &[(RecordId, String)]) {
    if entries.is_empty() {
        return;
    }
    let ids: Vec<RecordId> = entries.iter().map(|(id, _)| id.clone()).collect();
    match store.delete_by_ids(&ids).await {
        Ok(()) => {
            tracing::info!(target: "scan", count = ids.len(), "rolled back pending records");
        }
        Err(err) => {
            tracing::warn!(
                target: "scan",
                error = %err,
                ids = ?ids,
                "rollback failed; pending records left behind"
            );
        }
    }
}
