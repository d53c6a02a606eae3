use std::{convert::Infallible, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier assigned by the store on insert. Projects use either integer or uuid keys,
/// so both shapes are kept exactly as the store returned them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{id}"),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl FromStr for RecordId {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.parse::<i64>() {
            Ok(id) => RecordId::Int(id),
            Err(_) => RecordId::Text(value.to_string()),
        })
    }
}

impl RecordId {
    /// Literal form used inside PostgREST and realtime filters.
    pub fn filter_literal(&self) -> String {
        match self {
            RecordId::Int(id) => id.to_string(),
            RecordId::Text(id) => format!("\"{}\"", id.replace('"', "\\\"")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanStatus {
    #[default]
    Clean,
    Suspicious,
    Dangerous,
    Error,
}

impl ScanStatus {
    /// Maps whatever label the scorer wrote into the fixed set.
    pub fn from_store_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "clean" => ScanStatus::Clean,
            "review" | "suspicious" => ScanStatus::Suspicious,
            "high risk" | "dangerous" => ScanStatus::Dangerous,
            _ => ScanStatus::Error,
        }
    }

    pub fn store_label(self) -> &'static str {
        match self {
            ScanStatus::Clean => "Clean",
            ScanStatus::Suspicious => "Review",
            ScanStatus::Dangerous => "High Risk",
            ScanStatus::Error => "Error",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Clean => "clean",
            ScanStatus::Suspicious => "suspicious",
            ScanStatus::Dangerous => "dangerous",
            ScanStatus::Error => "error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ScanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ScanStatus::from_store_label(&label))
    }
}

/// One row of the remote domains table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DomainRecord {
    pub id: RecordId,
    pub domain: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spam_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ScanStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub number_of_checks: u32,
    #[serde(default)]
    pub critical_urls: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of the pending-row insert.
#[derive(Debug, Clone, Serialize)]
pub struct NewDomainRecord<'a> {
    pub domain: &'a str,
    pub spam_score: f64,
    pub status: &'static str,
}

impl<'a> NewDomainRecord<'a> {
    pub fn pending(domain: &'a str) -> Self {
        Self {
            domain,
            spam_score: 0.0,
            status: ScanStatus::Clean.store_label(),
        }
    }
}

pub fn score_band(score: f64) -> &'static str {
    if score >= 7.0 {
        "High Risk"
    } else if score >= 4.0 {
        "Medium Risk"
    } else {
        "Low Risk"
    }
}
