//! Plain-text rendering of results, history and remote rows for the terminal.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::{
    record::score_band, BulkScanResult, DomainRecord, HistoryItem, HistoryPayload, ScanStatus,
    UrlScanResult,
};

const URL_DISPLAY_WIDTH: usize = 50;

pub fn parse_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!(timezone = name, "unknown timezone; using UTC");
        Tz::UTC
    })
}

/// e.g. `Oct 19, 2026, 09:30 AM`
pub fn format_timestamp(ts: &DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%b %-d, %Y, %I:%M %p").to_string()
}

/// Drops scheme and `www.`, then shortens to the display width.
pub fn format_url_for_display(url: &str) -> String {
    let lowered = url.to_ascii_lowercase();
    let mut start = 0;
    for prefix in ["https://", "http://"] {
        if lowered.starts_with(prefix) {
            start = prefix.len();
            break;
        }
    }
    if lowered[start..].starts_with("www.") {
        start += 4;
    }
    let display = &url[start..];
    if display.chars().count() > URL_DISPLAY_WIDTH {
        let head: String = display.chars().take(URL_DISPLAY_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        display.to_string()
    }
}

pub fn render_result(result: &UrlScanResult, tz: Tz) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "URL:        {}", format_url_for_display(&result.url));
    let _ = writeln!(out, "Status:     {}", capitalize(result.status.as_str()));
    let _ = writeln!(
        out,
        "Spam score: {:.1}/10 ({})",
        result.spam_score,
        score_band(result.spam_score)
    );
    let _ = writeln!(out, "Scanned:    {}", format_timestamp(&result.timestamp, tz));
    if let Some(message) = &result.message {
        let _ = writeln!(out, "Message:    {message}");
    }
    if let Some(urls) = &result.critical_urls {
        let _ = writeln!(out, "Critical URLs:");
        for url in urls {
            let _ = writeln!(out, "  - {url}");
        }
    }
    out
}

pub fn render_bulk(bulk: &BulkScanResult, tz: Tz) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Scanned {} URLs at {}",
        bulk.total_scanned,
        format_timestamp(&bulk.timestamp, tz)
    );
    let count = |status: ScanStatus| bulk.results.iter().filter(|r| r.status == status).count();
    let _ = writeln!(
        out,
        "{} clean, {} suspicious, {} dangerous, {} error",
        count(ScanStatus::Clean),
        count(ScanStatus::Suspicious),
        count(ScanStatus::Dangerous),
        count(ScanStatus::Error)
    );
    let _ = writeln!(out, "{:<50}  {:>5}  {:<10}  {}", "URL", "SCORE", "STATUS", "MESSAGE");
    for result in &bulk.results {
        let _ = writeln!(
            out,
            "{:<50}  {:>5.1}  {:<10}  {}",
            format_url_for_display(&result.url),
            result.spam_score,
            result.status.as_str(),
            result.message.as_deref().unwrap_or("")
        );
    }
    out
}

pub fn render_history(items: &[HistoryItem], tz: Tz) -> String {
    if items.is_empty() {
        return "No scan history available\n".to_string();
    }
    let mut out = String::new();
    for item in items {
        let summary = match &item.payload {
            HistoryPayload::Single(result) => format!(
                "{} ({}, {:.1})",
                format_url_for_display(&result.url),
                result.status,
                result.spam_score
            ),
            HistoryPayload::Bulk(bulk) => format!("{} URLs", bulk.total_scanned),
        };
        let _ = writeln!(
            out,
            "{}  {:<6}  {}  {}",
            item.id,
            item.payload.kind(),
            format_timestamp(&item.timestamp, tz),
            summary
        );
    }
    out
}

pub fn render_records(records: &[DomainRecord], tz: Tz) -> String {
    if records.is_empty() {
        return "No records\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let created = record
            .created_at
            .map(|ts| format_timestamp(&ts, tz))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12} {:<40} {:>5.1} {:<10} checks={} {}",
            record.id.to_string(),
            format_url_for_display(&record.domain),
            record.spam_score,
            record.status.as_str(),
            record.number_of_checks,
            created
        );
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_render_in_the_requested_zone() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 13, 5, 0).unwrap();
        assert_eq!(format_timestamp(&ts, Tz::UTC), "Oct 19, 2026, 01:05 PM");
        assert_eq!(
            format_timestamp(&ts, parse_timezone("Asia/Seoul")),
            "Oct 19, 2026, 10:05 PM"
        );
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
    }

    #[test]
    fn display_urls_are_trimmed_and_truncated() {
        assert_eq!(format_url_for_display("https://www.example.com/a"), "example.com/a");
        let long = format!("http://{}", "a".repeat(80));
        let shown = format_url_for_display(&long);
        assert_eq!(shown.len(), 50);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn result_block_shows_band_and_critical_urls() {
        let result = UrlScanResult {
            url: "spam.example".into(),
            spam_score: 8.5,
            status: ScanStatus::Dangerous,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 13, 5, 0).unwrap(),
            critical_urls: Some(vec!["http://data-stealer.net".into()]),
            message: Some("High likelihood of malicious content detected".into()),
        };
        let text = render_result(&result, Tz::UTC);
        assert!(text.contains("Status:     Dangerous"));
        assert!(text.contains("8.5/10 (High Risk)"));
        assert!(text.contains("  - http://data-stealer.net"));
    }

    #[test]
    fn bulk_table_summarises_statuses() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 13, 5, 0).unwrap();
        let result = |url: &str, status| UrlScanResult {
            url: url.into(),
            spam_score: 1.0,
            status,
            timestamp: ts,
            critical_urls: None,
            message: None,
        };
        let bulk = BulkScanResult {
            results: vec![
                result("a.com", ScanStatus::Clean),
                result("b.com", ScanStatus::Dangerous),
                result("c.com", ScanStatus::Clean),
            ],
            total_scanned: 3,
            timestamp: ts,
        };
        let text = render_bulk(&bulk, Tz::UTC);
        assert!(text.contains("2 clean, 0 suspicious, 1 dangerous, 0 error"));
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn empty_history_has_a_placeholder() {
        assert_eq!(render_history(&[], Tz::UTC), "No scan history available\n");
    }
}
