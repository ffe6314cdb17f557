//! Bulk extract job orchestration.
//!
//! One job moves through `create -> enqueue -> poll -> download`. Each
//! individual call goes through the transport and gets transient-failure
//! retry there; the polling loop below only governs job-level progress.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::model::{BulkEntity, DownloadRange, JobStatus};
use crate::transport::RestTransport;

/// What to extract and over which window. Field selection and the filter
/// field only apply to leads; activity extracts always filter on creation
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractEntity {
    Lead {
        fields: Vec<String>,
        filter_field: Option<String>,
    },
    Activity,
}

impl ExtractEntity {
    pub const fn kind(&self) -> BulkEntity {
        match self {
            Self::Lead { .. } => BulkEntity::Lead,
            Self::Activity => BulkEntity::Activity,
        }
    }
}

/// Immutable description of one extract job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub entity: ExtractEntity,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Job state as reported by the status endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    pub export_id: String,
    pub status: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl ExportStatus {
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportHandle {
    export_id: String,
}

/// Drives one bulk extract job through its lifecycle.
#[derive(Debug)]
pub struct BulkExtract {
    transport: Arc<RestTransport>,
    entity: BulkEntity,
}

impl BulkExtract {
    pub fn new(transport: Arc<RestTransport>, entity: BulkEntity) -> Self {
        Self { transport, entity }
    }

    /// Submits the job and returns the vendor-assigned job id.
    pub async fn create(&self, request: &ExtractRequest) -> Result<String, ClientError> {
        let body = create_body(request)?;
        let envelope = self
            .transport
            .post_envelope::<ExportHandle>(
                Endpoint::CreateExtract {
                    entity: self.entity,
                },
                Vec::new(),
                Some(body),
            )
            .await?;
        envelope
            .result
            .into_iter()
            .next()
            .map(|handle| handle.export_id)
            .ok_or_else(|| ClientError::Payload(String::from("create response missing exportId")))
    }

    /// Enqueues a created job. Issued once per job; the vendor rejects
    /// repeated starts, so callers never re-enqueue.
    pub async fn start(&self, job_id: &str) -> Result<(), ClientError> {
        self.transport
            .post_envelope::<serde_json::Value>(
                Endpoint::EnqueueExtract {
                    entity: self.entity,
                    job_id: job_id.to_owned(),
                },
                Vec::new(),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn status(&self, job_id: &str) -> Result<ExportStatus, ClientError> {
        let envelope = self
            .transport
            .get_envelope::<ExportStatus>(
                Endpoint::ExtractStatus {
                    entity: self.entity,
                    job_id: job_id.to_owned(),
                },
                Vec::new(),
            )
            .await?;
        envelope
            .result
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Payload(String::from("status response missing result")))
    }

    /// Polls on a fixed interval until the job reaches a terminal state.
    ///
    /// Returns the final status (carrying `fileSize`) on completion, a
    /// [`ClientError::JobFailed`] on failure or cancellation, and a
    /// [`ClientError::JobTimeout`] once `max_polls` is exhausted.
    pub async fn wait_until_complete(
        &self,
        job_id: &str,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<ExportStatus, ClientError> {
        for poll in 0..max_polls {
            let status = self.status(job_id).await?;
            let job_status = status.job_status().ok_or_else(|| {
                ClientError::Payload(format!("unrecognized job status '{}'", status.status))
            })?;
            tracing::debug!(job_id, poll, status = %job_status, "bulk extract status");
            match job_status {
                JobStatus::Complete => return Ok(status),
                JobStatus::Failed | JobStatus::Cancelled => {
                    return Err(ClientError::JobFailed {
                        job_id: job_id.to_owned(),
                        status: job_status,
                    });
                }
                _ => {
                    if poll + 1 < max_polls {
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
        Err(ClientError::JobTimeout {
            job_id: job_id.to_owned(),
            polls: max_polls,
        })
    }

    /// Streams the result file into `writer` as one or more byte-range
    /// requests, each independently retried by the transport. Returns the
    /// number of bytes written.
    pub async fn download<W: Write>(
        &self,
        job_id: &str,
        file_size: Option<u64>,
        writer: &mut W,
    ) -> Result<u64, ClientError> {
        let endpoint = Endpoint::ExtractFile {
            entity: self.entity,
            job_id: job_id.to_owned(),
        };
        let chunk_size = self.transport.config().download_chunk_size;
        let mut offset = 0u64;

        loop {
            let range = match (chunk_size, file_size) {
                (Some(chunk), Some(total)) => {
                    if offset >= total {
                        break;
                    }
                    DownloadRange::with_length(offset, chunk.min(total - offset))
                }
                (Some(chunk), None) => DownloadRange::with_length(offset, chunk),
                (None, _) => DownloadRange::from_offset(offset),
            };

            let fetch = self
                .transport
                .get_bytes(
                    endpoint.clone(),
                    vec![(String::from("Range"), range.header_value())],
                )
                .await;
            let bytes = match fetch {
                Ok(bytes) => bytes,
                // Without a known size the only way to find the end is to
                // request past it; the vendor answers 416 once every byte
                // has been served (or the file is empty).
                Err(ClientError::Transport {
                    status: Some(416), ..
                }) if file_size.is_none() => break,
                Err(error) => return Err(error),
            };
            if bytes.is_empty() {
                break;
            }
            writer.write_all(&bytes)?;
            offset += bytes.len() as u64;

            let done = match (chunk_size, file_size) {
                // Open-ended range fetches the whole remainder at once.
                (None, _) => true,
                (Some(_), Some(total)) => offset >= total,
                // Without a known size, a short chunk marks the end.
                (Some(chunk), None) => (bytes.len() as u64) < chunk,
            };
            if done {
                break;
            }
        }

        Ok(offset)
    }
}

fn create_body(request: &ExtractRequest) -> Result<serde_json::Value, ClientError> {
    let start = format_timestamp(request.start)?;
    let end = format_timestamp(request.end)?;

    let body = match &request.entity {
        ExtractEntity::Lead {
            fields,
            filter_field,
        } => {
            let filter_field = filter_field.as_deref().unwrap_or("createdAt");
            json!({
                "format": "csv",
                "fields": fields,
                "filter": { filter_field: { "startAt": start, "endAt": end } },
            })
        }
        ExtractEntity::Activity => json!({
            "format": "csv",
            "filter": { "createdAt": { "startAt": start, "endAt": end } },
        }),
    };
    Ok(body)
}

fn format_timestamp(value: OffsetDateTime) -> Result<String, ClientError> {
    value
        .format(&Rfc3339)
        .map_err(|e| ClientError::Payload(format!("unformattable timestamp: {e}")))
}
