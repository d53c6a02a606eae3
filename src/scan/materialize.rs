use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    domain::{BulkScanResult, DomainRecord, RecordId, ScanOutcome, UrlScanResult},
    store::RecordStore,
};

use super::{progress::ScanSession, ScanError, ScanKind};

/// Reads the final rows of a completed session and shapes them for display.
pub async fn fetch_results(
    store: &dyn RecordStore,
    session: &ScanSession,
    kind: ScanKind,
) -> Result<ScanOutcome, ScanError> {
    let rows = store
        .fetch_by_ids(session.record_ids())
        .await
        .map_err(|err| ScanError::Fetch {
            reason: "final read failed".into(),
            source: Some(err),
        })?;
    build_outcome(rows, session.record_ids(), kind, Utc::now())
}

/// `fetched_at` becomes every result's timestamp.
pub fn build_outcome(
    rows: Vec<DomainRecord>,
    order: &[RecordId],
    kind: ScanKind,
    fetched_at: DateTime<Utc>,
) -> Result<ScanOutcome, ScanError> {
    let mut by_id: HashMap<RecordId, DomainRecord> =
        rows.into_iter().map(|row| (row.id.clone(), row)).collect();
    let results: Vec<UrlScanResult> = order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|row| to_result(row, fetched_at))
        .collect();

    if results.is_empty() {
        return Err(ScanError::Fetch {
            reason: "no rows matched the scanned records".into(),
            source: None,
        });
    }
    if results.len() < order.len() {
        tracing::warn!(
            target: "scan",
            expected = order.len(),
            found = results.len(),
            "some scanned records disappeared before the final read"
        );
    }

    Ok(match kind {
        ScanKind::Single => {
            let mut results = results;
            ScanOutcome::Single(results.swap_remove(0))
        }
        ScanKind::Bulk => ScanOutcome::Bulk(BulkScanResult {
            total_scanned: results.len(),
            results,
            timestamp: fetched_at,
        }),
    })
}

fn to_result(row: DomainRecord, fetched_at: DateTime<Utc>) -> UrlScanResult {
    let critical_urls = row
        .critical_urls
        .as_deref()
        .map(|joined| {
            joined
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|urls| !urls.is_empty());
    UrlScanResult {
        url: row.domain,
        spam_score: row.spam_score,
        status: row.status,
        timestamp: fetched_at,
        critical_urls,
        message: row.message,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::ScanStatus;

    fn row(id: i64, domain: &str, status: &str) -> DomainRecord {
        DomainRecord {
            id: RecordId::Int(id),
            domain: domain.into(),
            spam_score: 1.2,
            status: ScanStatus::from_store_label(status),
            number_of_checks: 3,
            critical_urls: None,
            message: None,
            created_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn single_scan_maps_status_and_timestamp() {
        let outcome = build_outcome(
            vec![row(1, "example.com", "Clean")],
            &[RecordId::Int(1)],
            ScanKind::Single,
            now(),
        )
        .unwrap();
        let ScanOutcome::Single(result) = outcome else {
            panic!("expected a single result");
        };
        assert_eq!(result.url, "example.com");
        assert_eq!(result.spam_score, 1.2);
        assert_eq!(result.status.as_str(), "clean");
        assert_eq!(result.timestamp, now());
        assert_eq!(result.critical_urls, None);
    }

    #[test]
    fn bulk_keeps_submission_order_and_splits_critical_urls() {
        let mut risky = row(2, "b.com", "High Risk");
        risky.critical_urls = Some("http://x.com, http://y.net,".into());
        let rows = vec![risky, row(1, "a.com", "Review"), row(9, "other.com", "Clean")];
        let order = [RecordId::Int(1), RecordId::Int(2)];

        let ScanOutcome::Bulk(bulk) = build_outcome(rows, &order, ScanKind::Bulk, now()).unwrap()
        else {
            panic!("expected bulk results");
        };
        assert_eq!(bulk.total_scanned, 2);
        assert_eq!(bulk.results[0].url, "a.com");
        assert_eq!(bulk.results[0].status, ScanStatus::Suspicious);
        assert_eq!(bulk.results[1].status, ScanStatus::Dangerous);
        assert_eq!(
            bulk.results[1].critical_urls,
            Some(vec!["http://x.com".to_string(), "http://y.net".to_string()])
        );
    }

    #[test]
    fn no_matching_rows_is_a_fetch_error() {
        let err = build_outcome(
            vec![row(5, "x.com", "Clean")],
            &[RecordId::Int(1)],
            ScanKind::Bulk,
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Fetch { source: None, .. }));
    }
}
