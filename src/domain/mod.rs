pub mod record;
pub mod result;

pub use record::{DomainRecord, NewDomainRecord, RecordId, ScanStatus};
pub use result::{BulkScanResult, HistoryItem, HistoryPayload, ScanOutcome, UrlScanResult};
