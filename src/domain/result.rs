use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::ScanStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlScanResult {
    pub url: String,
    pub spam_score: f64,
    pub status: ScanStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkScanResult {
    pub results: Vec<UrlScanResult>,
    pub total_scanned: usize,
    pub timestamp: DateTime<Utc>,
}

/// Final outcome of one scan session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Single(UrlScanResult),
    Bulk(BulkScanResult),
}

impl ScanOutcome {
    pub fn results(&self) -> &[UrlScanResult] {
        match self {
            ScanOutcome::Single(result) => std::slice::from_ref(result),
            ScanOutcome::Bulk(bulk) => &bulk.results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum HistoryPayload {
    Single(UrlScanResult),
    Bulk(BulkScanResult),
}

impl HistoryPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryPayload::Single(_) => "single",
            HistoryPayload::Bulk(_) => "bulk",
        }
    }

    pub fn results(&self) -> &[UrlScanResult] {
        match self {
            HistoryPayload::Single(result) => std::slice::from_ref(result),
            HistoryPayload::Bulk(bulk) => &bulk.results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: HistoryPayload,
}

impl HistoryItem {
    pub fn new(payload: HistoryPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            timestamp,
            payload,
        }
    }
}

impl From<ScanOutcome> for HistoryPayload {
    fn from(outcome: ScanOutcome) -> Self {
        match outcome {
            ScanOutcome::Single(result) => HistoryPayload::Single(result),
            ScanOutcome::Bulk(bulk) => HistoryPayload::Bulk(bulk),
        }
    }
}

/// ISO-8601 with millisecond precision, the shape browsers emit for `toISOString`.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample(url: &str) -> UrlScanResult {
        UrlScanResult {
            url: url.to_string(),
            spam_score: 1.2,
            status: ScanStatus::Clean,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
            critical_urls: None,
            message: Some("No malicious content detected".into()),
        }
    }

    #[test]
    fn history_item_serializes_with_type_and_data() {
        let item = HistoryItem {
            id: "abc".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 31, 0).unwrap(),
            payload: HistoryPayload::Single(sample("example.com")),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "single");
        assert_eq!(json["data"]["url"], "example.com");
        assert_eq!(json["data"]["spamScore"], 1.2);
        assert_eq!(json["data"]["status"], "clean");
        assert!(json["data"].get("criticalUrls").is_none());

        let back: HistoryItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn bulk_payload_uses_camel_case_totals() {
        let bulk = BulkScanResult {
            results: vec![sample("a.com"), sample("b.com")],
            total_scanned: 2,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 31, 0).unwrap(),
        };
        let json = serde_json::to_value(HistoryPayload::Bulk(bulk)).unwrap();
        assert_eq!(json["type"], "bulk");
        assert_eq!(json["data"]["totalScanned"], 2);
    }

    #[test]
    fn iso_timestamp_keeps_milliseconds() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap();
        assert_eq!(iso_timestamp(&ts), "2026-10-19T09:30:00.000Z");
    }
}
