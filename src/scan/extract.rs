use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::ScanError;

/// Largest CSV upload accepted for a bulk scan.
pub const MAX_CSV_BYTES: u64 = 5 * 1024 * 1024;

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("valid scheme regex"));
static WWW_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(www\.)+").expect("valid www regex"));
static ANY_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]+://").expect("valid any-scheme regex"));

/// Reduces user input to a bare host: scheme, leading `www.` and path are dropped.
/// Never fails; garbage in yields a degenerate (possibly empty) domain.
pub fn extract_domain(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(value: &str) -> String {
    let without_scheme = SCHEME_PREFIX.replace(value, "");
    let without_www = WWW_PREFIX.replace(without_scheme.trim_start(), "");
    without_www
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

pub fn is_valid_url(raw: &str) -> bool {
    let candidate = if ANY_SCHEME.is_match(raw) {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    matches!(Url::parse(&candidate), Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()))
}

/// Validates a single-scan input and returns its domain.
pub fn domain_for_single_scan(raw: &str) -> Result<String, ScanError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::Validation("URL required".into()));
    }
    if !is_valid_url(trimmed) {
        return Err(ScanError::Validation(format!(
            "invalid URL format: {trimmed} (e.g. example.com)"
        )));
    }
    let domain = extract_domain(trimmed);
    if domain.is_empty() {
        return Err(ScanError::Validation(format!("no domain in {trimmed}")));
    }
    Ok(domain)
}

/// First-column labels treated as a header row rather than a domain.
const HEADER_LABELS: [&str; 7] = ["url", "urls", "domain", "domains", "website", "site", "link"];

/// Pulls domains out of CSV text: first column of every non-blank line. A leading
/// header row (`url`, `domain`, ...) is skipped.
pub fn domains_from_csv(content: &str) -> Result<Vec<String>, ScanError> {
    let domains: Vec<String> = content
        .split('\n')
        .filter_map(|line| line.split(',').next())
        .map(|cell| strip_quotes(cell.trim()))
        .enumerate()
        .filter(|(index, cell)| !(*index == 0 && is_header_label(cell)))
        .map(|(_, cell)| cell)
        .filter(|cell| !cell.is_empty() && is_valid_url(cell))
        .map(extract_domain)
        .filter(|domain| !domain.is_empty())
        .collect();

    if domains.is_empty() {
        return Err(ScanError::Validation(
            "no valid domains found in the CSV file".into(),
        ));
    }
    Ok(domains)
}

/// Checks the upload before anything is read or sent.
pub fn check_csv_upload(path: &Path, size: u64) -> Result<(), ScanError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(ScanError::Validation(format!(
            "{} is not a CSV file",
            path.display()
        )));
    }
    if size > MAX_CSV_BYTES {
        return Err(ScanError::Validation(format!(
            "file is {size} bytes; uploads must be at most 5 MiB"
        )));
    }
    Ok(())
}

pub async fn read_csv_domains(path: &Path) -> Result<Vec<String>, ScanError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|err| {
        ScanError::Validation(format!("cannot read {}: {err}", path.display()))
    })?;
    check_csv_upload(path, metadata.len())?;

    let bytes = tokio::fs::read(path).await.map_err(|err| {
        ScanError::Validation(format!("cannot read {}: {err}", path.display()))
    })?;
    let content = String::from_utf8_lossy(&bytes);
    let domains = domains_from_csv(&content)?;
    tracing::info!(target: "scan", file = %path.display(), total = domains.len(), "csv parsed");
    Ok(domains)
}

fn is_header_label(cell: &str) -> bool {
    HEADER_LABELS
        .iter()
        .any(|label| cell.eq_ignore_ascii_case(label))
}

fn strip_quotes(cell: &str) -> &str {
    for quote in ['"', '\''] {
        if cell.len() >= 2 && cell.starts_with(quote) && cell.ends_with(quote) {
            return &cell[1..cell.len() - 1];
        }
    }
    cell
}
