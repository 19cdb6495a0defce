use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const SCRAPER_NAME: &str = "Page Pulse Content Analytics";
pub const SCRAPER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key the run report is stored under in the key-value store.
pub const REPORT_KEY: &str = "PERFORMANCE_REPORT";

/// Current instant as ISO-8601 with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Top-level fields pulled from a page, before any score is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFields {
    pub url: String,
    pub title: String,
    pub headings: Vec<String>,
    pub link_count: usize,
    pub image_count: usize,
    pub content: String,
    pub meta_description: String,
    pub timestamp: String,
}

impl PageFields {
    pub const FIELD_COUNT: usize = 8;

    /// Which of the top-level fields hold a non-empty value. The heading
    /// list always counts, even when empty; zero counts never do.
    pub fn filled(&self) -> [bool; Self::FIELD_COUNT] {
        [
            !self.url.is_empty(),
            !self.title.is_empty(),
            true,
            self.link_count > 0,
            self.image_count > 0,
            !self.content.is_empty(),
            !self.meta_description.is_empty(),
            !self.timestamp.is_empty(),
        ]
    }

    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub overall: f64,
    pub completeness: usize,
    pub has_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub content_length: usize,
    pub reading_time: usize,
    pub has_meta_description: bool,
    pub heading_structure: usize,
    pub engagement_potential: f64,
    pub business_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub scraped_at: String,
    pub processing_time_ms: u64,
    pub scraper_version: String,
}

/// One successfully processed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecord {
    #[serde(flatten)]
    pub fields: PageFields,
    pub data_quality: DataQuality,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub analytics: Option<Analytics>,
    pub metadata: Metadata,
}

/// One failed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error: bool,
    pub url: String,
    pub error_message: String,
    pub timestamp: String,
}

impl ErrorRecord {
    pub fn new(url: &str, message: impl Into<String>) -> Self {
        ErrorRecord {
            error: true,
            url: url.to_string(),
            error_message: message.into(),
            timestamp: iso_now(),
        }
    }
}

/// What the orchestrator emits for each URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Error(ErrorRecord),
    Extracted(Box<ExtractedRecord>),
}

impl Record {
    pub fn url(&self) -> &str {
        match self {
            Record::Extracted(r) => &r.fields.url,
            Record::Error(e) => &e.url,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Record::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_processed: usize,
    pub successful_extractions: usize,
    pub success_rate: f64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperInfo {
    pub name: String,
    pub version: String,
}

impl Default for ScraperInfo {
    fn default() -> Self {
        ScraperInfo {
            name: SCRAPER_NAME.to_string(),
            version: SCRAPER_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: RunSummary,
    pub scraper_info: ScraperInfo,
}

impl RunReport {
    pub fn new(total_processed: usize, successful_extractions: usize, total_duration_ms: u64) -> Self {
        RunReport {
            summary: RunSummary {
                total_processed,
                successful_extractions,
                success_rate: success_rate(successful_extractions, total_processed),
                total_duration_ms,
            },
            scraper_info: ScraperInfo::default(),
        }
    }
}

/// Percentage of successful extractions; 0 when nothing was processed.
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}
