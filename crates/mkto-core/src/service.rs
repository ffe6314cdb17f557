//! High-level service facade and the host-facing boundary.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use time::OffsetDateTime;

use crate::bulk::{BulkExtract, ExtractEntity, ExtractRequest};
use crate::config::{ClientConfig, PREVIEW_RECORD_LIMIT};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::model::{MarketoDataType, MarketoField};
use crate::paging::{ChildKind, PageIterator, ParentChildIterator, RecordStream};
use crate::transport::{HttpClient, RestTransport, ReqwestHttpClient};

/// Host-side consumer accepting one record at a time.
pub trait RecordSink {
    fn accept(&mut self, record: crate::model::Record) -> Result<(), ClientError>;
}

/// The only host-facing entry points: bulk extracts, flattened lead
/// listings, campaign listing, and lead field metadata.
pub struct MarketoService {
    transport: Arc<RestTransport>,
}

impl MarketoService {
    /// Builds a service talking to the real vendor API.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = Arc::new(ReqwestHttpClient::from_config(&config)?);
        Ok(Self::with_http_client(config, http))
    }

    /// Builds a service on a caller-supplied transport; used by tests and
    /// hosts that manage their own HTTP stack.
    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            transport: Arc::new(RestTransport::new(http, Arc::new(config))),
        }
    }

    /// Runs a lead bulk extract end to end and returns the materialized
    /// result file, rewound to the start. The temp file's lifetime is the
    /// caller's responsibility.
    pub async fn extract_lead(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        fields: Vec<String>,
        filter_field: Option<String>,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<NamedTempFile, ClientError> {
        let request = ExtractRequest {
            entity: ExtractEntity::Lead {
                fields,
                filter_field,
            },
            start,
            end,
        };
        self.run_extract(&request, poll_interval, max_polls).await
    }

    /// Runs an activity bulk extract end to end; activities take no field
    /// selection or filter field.
    pub async fn extract_all_activity(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<NamedTempFile, ClientError> {
        let request = ExtractRequest {
            entity: ExtractEntity::Activity,
            start,
            end,
        };
        self.run_extract(&request, poll_interval, max_polls).await
    }

    async fn run_extract(
        &self,
        request: &ExtractRequest,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<NamedTempFile, ClientError> {
        let entity = request.entity.kind();
        let bulk = BulkExtract::new(Arc::clone(&self.transport), entity);
        let job_id = bulk.create(request).await?;
        tracing::info!(
            job_id = %job_id,
            entity = entity.path_segment(),
            "bulk extract created"
        );
        bulk.start(&job_id).await?;
        let status = bulk
            .wait_until_complete(&job_id, poll_interval, max_polls)
            .await?;

        let mut file = NamedTempFile::new()?;
        let written = bulk
            .download(&job_id, status.file_size, file.as_file_mut())
            .await?;
        tracing::info!(job_id = %job_id, bytes = written, "bulk extract downloaded");
        file.as_file_mut().flush()?;
        file.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// All leads of all lists, flattened in list order then page order.
    pub fn get_all_list_lead(&self, fields: &[String]) -> ParentChildIterator {
        self.parent_child(Endpoint::Lists, ChildKind::LeadsByList, fields)
    }

    /// All leads of all programs, flattened in program order then page order.
    pub fn get_all_program_lead(&self, fields: &[String]) -> ParentChildIterator {
        self.parent_child(Endpoint::Programs, ChildKind::LeadsByProgram, fields)
    }

    fn parent_child(
        &self,
        parent_endpoint: Endpoint,
        child_kind: ChildKind,
        fields: &[String],
    ) -> ParentChildIterator {
        let parents = PageIterator::new(
            Arc::clone(&self.transport),
            parent_endpoint,
            self.page_query(),
        );
        ParentChildIterator::new(Arc::clone(&self.transport), parents, child_kind, fields)
    }

    fn page_query(&self) -> Vec<(String, String)> {
        vec![(
            String::from("batchSize"),
            self.transport.config().effective_batch_size().to_string(),
        )]
    }

    /// Campaign records, cursor-paginated.
    pub fn get_campaign(&self) -> PageIterator {
        PageIterator::new(
            Arc::clone(&self.transport),
            Endpoint::Campaigns,
            self.page_query(),
        )
    }

    /// Raw lead field metadata from the describe endpoint.
    pub async fn describe_lead(&self) -> Result<Vec<MarketoField>, ClientError> {
        let envelope = self
            .transport
            .get_envelope::<serde_json::Value>(Endpoint::DescribeLead, Vec::new())
            .await?;
        envelope.result.iter().map(describe_field).collect()
    }

    /// Lead metadata for program-scoped extraction: the vendor schema plus
    /// a synthetic `programId` column the host's record shaping fills in.
    pub async fn describe_lead_by_program(&self) -> Result<Vec<MarketoField>, ClientError> {
        let mut fields = self.describe_lead().await?;
        fields.push(MarketoField::new("programId", MarketoDataType::String));
        Ok(fields)
    }

    /// Lead metadata for list-scoped extraction: the vendor schema plus a
    /// synthetic `listId` column.
    pub async fn describe_lead_by_lists(&self) -> Result<Vec<MarketoField>, ClientError> {
        let mut fields = self.describe_lead().await?;
        fields.push(MarketoField::new("listId", MarketoDataType::String));
        Ok(fields)
    }

    /// Drains a record stream into the host's sink. Preview mode caps the
    /// number of records at [`PREVIEW_RECORD_LIMIT`].
    pub async fn ingest(
        &self,
        stream: &mut dyn RecordStream,
        sink: &mut dyn RecordSink,
    ) -> Result<usize, ClientError> {
        let limit = self
            .transport
            .config()
            .preview
            .then_some(PREVIEW_RECORD_LIMIT);
        let mut imported = 0;
        while limit.map_or(true, |cap| imported < cap) {
            match stream.try_next().await? {
                Some(record) => {
                    sink.accept(record)?;
                    imported += 1;
                }
                None => break,
            }
        }
        Ok(imported)
    }
}

impl std::fmt::Debug for MarketoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketoService").finish_non_exhaustive()
    }
}

fn describe_field(entry: &serde_json::Value) -> Result<MarketoField, ClientError> {
    // The REST name lives under `rest.name`; fall back to the display name.
    let name = entry
        .pointer("/rest/name")
        .or_else(|| entry.get("name"))
        .or_else(|| entry.get("displayName"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ClientError::Payload(String::from("describe entry missing field name")))?;
    let data_type = entry
        .get("dataType")
        .and_then(serde_json::Value::as_str)
        .map(MarketoDataType::parse)
        .unwrap_or(MarketoDataType::String);
    Ok(MarketoField::new(name, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use crate::transport::ScriptedHttpClient;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;

    fn service(http: Arc<ScriptedHttpClient>, preview: bool) -> MarketoService {
        let mut config = ClientConfig::new("https://example.mktorest.com", "id", "secret");
        config.request_interval = Duration::from_millis(1);
        config.preview = preview;
        MarketoService::with_http_client(config, http)
    }

    struct CannedStream {
        records: VecDeque<Record>,
    }

    impl CannedStream {
        fn of(count: usize) -> Self {
            let records = (0..count)
                .map(|index| {
                    let mut record = Record::new();
                    record.insert(String::from("id"), serde_json::json!(index));
                    record
                })
                .collect();
            Self { records }
        }
    }

    impl RecordStream for CannedStream {
        fn try_next<'a>(
            &'a mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, ClientError>> + Send + 'a>>
        {
            let next = self.records.pop_front();
            Box::pin(async move { Ok(next) })
        }
    }

    struct CollectingSink {
        records: Vec<Record>,
    }

    impl RecordSink for CollectingSink {
        fn accept(&mut self, record: Record) -> Result<(), ClientError> {
            self.records.push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn describe_lead_parses_rest_names_and_types() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.enqueue_json(r#"{"access_token": "tok"}"#);
        http.enqueue_json(
            r#"{"success": true, "result": [
                {"displayName": "Email Address", "dataType": "email", "rest": {"name": "email"}},
                {"displayName": "Created At", "dataType": "datetime", "rest": {"name": "createdAt"}}
            ]}"#,
        );

        let service = service(http, false);
        let fields = service.describe_lead().await.expect("describe");
        assert_eq!(
            fields,
            vec![
                MarketoField::new("email", MarketoDataType::Email),
                MarketoField::new("createdAt", MarketoDataType::Datetime),
            ]
        );
    }

    #[tokio::test]
    async fn describe_by_program_appends_exactly_one_program_id_field() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.enqueue_json(r#"{"access_token": "tok"}"#);
        http.enqueue_json(r#"{"success": true, "result": []}"#);

        let service = service(http, false);
        let fields = service.describe_lead_by_program().await.expect("describe");
        assert_eq!(
            fields,
            vec![MarketoField::new("programId", MarketoDataType::String)]
        );
    }

    #[tokio::test]
    async fn describe_by_lists_appends_exactly_one_list_id_field() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.enqueue_json(r#"{"access_token": "tok"}"#);
        http.enqueue_json(r#"{"success": true, "result": []}"#);

        let service = service(http, false);
        let fields = service.describe_lead_by_lists().await.expect("describe");
        assert_eq!(
            fields,
            vec![MarketoField::new("listId", MarketoDataType::String)]
        );
    }

    #[tokio::test]
    async fn ingest_drains_the_stream_without_preview() {
        let http = Arc::new(ScriptedHttpClient::new());
        let service = service(http, false);
        let mut stream = CannedStream::of(40);
        let mut sink = CollectingSink {
            records: Vec::new(),
        };

        let imported = service.ingest(&mut stream, &mut sink).await.expect("ingest");
        assert_eq!(imported, 40);
        assert_eq!(sink.records.len(), 40);
    }

    #[tokio::test]
    async fn preview_caps_ingest_at_the_record_limit() {
        let http = Arc::new(ScriptedHttpClient::new());
        let service = service(http, true);
        let mut stream = CannedStream::of(40);
        let mut sink = CollectingSink {
            records: Vec::new(),
        };

        let imported = service.ingest(&mut stream, &mut sink).await.expect("ingest");
        assert_eq!(imported, PREVIEW_RECORD_LIMIT);
        assert_eq!(sink.records.len(), PREVIEW_RECORD_LIMIT);
    }
}
