//! Wire-level types shared across the client.

use std::fmt::{Display, Formatter};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// One row from any endpoint, kept as an ordered key/value mapping.
///
/// The client never interprets record contents beyond what pagination needs
/// (the `id` field of parent entities); column mapping belongs to the host.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// OAuth access token held by the token manager. Opaque; no expiry timer is
/// tracked locally, staleness is discovered via a vendor 602 response.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub obtained_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            obtained_at: Instant::now(),
        }
    }
}

/// Semantic vendor error carried inside a 2xx envelope, distinct from the
/// HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketoError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Vendor response envelope separating a `result` payload from an `errors`
/// array, plus the pagination markers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketoResponse<T> {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
    #[serde(default)]
    pub errors: Vec<MarketoError>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub more_result: Option<bool>,
}

/// Bulk extract job status as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Created,
    Queued,
    Processing,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Parses the vendor's status string; the wire uses both "Completed" and
    /// "Complete" depending on endpoint version.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "complete" | "completed" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity type served by the bulk extract endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkEntity {
    Lead,
    Activity,
}

impl BulkEntity {
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Lead => "leads",
            Self::Activity => "activities",
        }
    }
}

/// Byte range of a bulk extract result file, sent as an HTTP `Range` header.
/// Offsets never decrease within one download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl DownloadRange {
    pub const fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    pub const fn with_length(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    pub fn header_value(&self) -> String {
        match self.length {
            Some(length) => format!("bytes={}-{}", self.offset, self.offset + length - 1),
            None => format!("bytes={}-", self.offset),
        }
    }
}

/// Lead field metadata returned by the describe endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketoField {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: MarketoDataType,
}

impl MarketoField {
    pub fn new(name: impl Into<String>, data_type: MarketoDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Closed set of describe data types. Anything the vendor adds that we do
/// not know about degrades to `String`, which every host mapping accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketoDataType {
    String,
    Boolean,
    Integer,
    Float,
    Date,
    Datetime,
    Email,
    Phone,
    Text,
    Url,
    Currency,
    Reference,
}

impl MarketoDataType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "text" => Self::Text,
            "url" => Self::Url,
            "currency" => Self::Currency,
            "reference" => Self::Reference,
            _ => Self::String,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_success_payload_with_page_token() {
        let body = r#"{
            "requestId": "a1b2",
            "success": true,
            "result": [{"id": 1}, {"id": 2}],
            "nextPageToken": "TOKEN==",
            "moreResult": true
        }"#;

        let envelope: MarketoResponse<Record> =
            serde_json::from_str(body).expect("envelope should parse");
        assert!(envelope.success);
        assert_eq!(envelope.result.len(), 2);
        assert_eq!(envelope.next_page_token.as_deref(), Some("TOKEN=="));
        assert_eq!(envelope.more_result, Some(true));
        assert!(envelope.errors.is_empty());
    }

    #[test]
    fn envelope_parses_error_list_without_result() {
        let body = r#"{
            "success": false,
            "errors": [{"code": "606", "message": "Max rate limit exceeded"}]
        }"#;

        let envelope: MarketoResponse<Record> =
            serde_json::from_str(body).expect("envelope should parse");
        assert!(!envelope.success);
        assert!(envelope.result.is_empty());
        assert_eq!(envelope.errors[0].code, "606");
    }

    #[test]
    fn job_status_parses_wire_variants() {
        assert_eq!(JobStatus::parse("Completed"), Some(JobStatus::Complete));
        assert_eq!(JobStatus::parse("Complete"), Some(JobStatus::Complete));
        assert_eq!(JobStatus::parse("Queued"), Some(JobStatus::Queued));
        assert_eq!(JobStatus::parse("Cancelled"), Some(JobStatus::Cancelled));
        assert_eq!(JobStatus::parse("nonsense"), None);
    }

    #[test]
    fn terminal_states_are_complete_failed_cancelled() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn download_range_header_formats() {
        assert_eq!(DownloadRange::from_offset(0).header_value(), "bytes=0-");
        assert_eq!(
            DownloadRange::with_length(100, 50).header_value(),
            "bytes=100-149"
        );
    }

    #[test]
    fn unknown_data_type_degrades_to_string() {
        assert_eq!(MarketoDataType::parse("datetime"), MarketoDataType::Datetime);
        assert_eq!(MarketoDataType::parse("percent"), MarketoDataType::String);
    }
}
