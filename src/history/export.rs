use anyhow::Result;
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::{result::iso_timestamp, BulkScanResult, HistoryItem, UrlScanResult};

/// One line of the full-history export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub url: String,
    pub spam_score: f64,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub url: String,
    pub spam_score: f64,
    pub status: String,
    pub message: String,
}

impl From<&UrlScanResult> for ResultRow {
    fn from(result: &UrlScanResult) -> Self {
        Self {
            url: result.url.clone(),
            spam_score: result.spam_score,
            status: result.status.as_str().to_string(),
            message: result.message.clone().unwrap_or_default(),
        }
    }
}

/// Flattens history into rows; a bulk item contributes one row per result.
pub fn history_rows(items: &[HistoryItem]) -> Vec<HistoryRow> {
    items
        .iter()
        .flat_map(|item| {
            let timestamp = iso_timestamp(&item.timestamp);
            item.payload.results().iter().map(move |result| HistoryRow {
                id: item.id.clone(),
                kind: item.payload.kind().to_string(),
                timestamp: timestamp.clone(),
                url: result.url.clone(),
                spam_score: result.spam_score,
                status: result.status.as_str().to_string(),
                message: result.message.clone().unwrap_or_default(),
            })
        })
        .collect()
}

/// `id,type,timestamp,url,spamScore,status,message`
pub fn history_csv(items: &[HistoryItem]) -> Result<String> {
    write_rows(history_rows(items))
}

/// `url,spamScore,status,message`
pub fn bulk_csv(bulk: &BulkScanResult) -> Result<String> {
    write_rows(bulk.results.iter().map(ResultRow::from).collect())
}

fn write_rows<T: Serialize>(rows: Vec<T>) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{HistoryPayload, ScanStatus};

    fn result(url: &str, score: f64, status: ScanStatus, message: Option<&str>) -> UrlScanResult {
        UrlScanResult {
            url: url.into(),
            spam_score: score,
            status,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
            critical_urls: Some(vec!["http://tracker.example".into()]),
            message: message.map(str::to_string),
        }
    }

    fn items() -> Vec<HistoryItem> {
        vec![
            HistoryItem {
                id: "b1".into(),
                timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
                payload: HistoryPayload::Bulk(BulkScanResult {
                    results: vec![
                        result("a.com", 8.5, ScanStatus::Dangerous, Some("High likelihood, \"phish\"")),
                        result("b.com", 5.7, ScanStatus::Suspicious, None),
                    ],
                    total_scanned: 2,
                    timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
                }),
            },
            HistoryItem {
                id: "s1".into(),
                timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
                payload: HistoryPayload::Single(result("example.com", 1.2, ScanStatus::Clean, Some("ok"))),
            },
        ]
    }

    #[test]
    fn history_export_has_header_and_quoted_strings() {
        let csv = history_csv(&items()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("\"id\",\"type\",\"timestamp\",\"url\",\"spamScore\",\"status\",\"message\"")
        );
        assert_eq!(
            lines.next(),
            Some("\"b1\",\"bulk\",\"2026-10-19T09:00:00.000Z\",\"a.com\",8.5,\"dangerous\",\"High likelihood, \"\"phish\"\"\"")
        );
        assert_eq!(csv.lines().count(), 4);
    }

    #[test]
    fn history_export_round_trips() {
        let items = items();
        let csv = history_csv(&items).unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let parsed: Vec<HistoryRow> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed, history_rows(&items));
        assert_eq!(parsed[2].id, "s1");
        assert_eq!(parsed[2].kind, "single");
        assert_eq!(parsed[1].message, "");
    }

    #[test]
    fn bulk_export_lists_results() {
        let HistoryPayload::Bulk(bulk) = items().remove(0).payload else {
            unreachable!()
        };
        let csv = bulk_csv(&bulk).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("\"url\",\"spamScore\",\"status\",\"message\""));
        assert_eq!(lines.nth(1), Some("\"b.com\",5.7,\"suspicious\",\"\""));
    }
}
