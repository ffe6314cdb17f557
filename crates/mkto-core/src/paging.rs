//! Lazy cursor-pagination iterators.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::model::Record;
use crate::transport::RestTransport;

/// Pull-based record stream consumed by the host one record at a time.
pub trait RecordStream: Send {
    fn try_next<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, ClientError>> + Send + 'a>>;
}

/// Lazy, finite, forward-only iterator over one cursor-paginated endpoint.
///
/// Each pull drains the in-memory page; when it is exhausted and the vendor
/// signalled more data, one paginated fetch replaces the buffer. Cursors are
/// single-use: the token from the latest response always replaces the
/// previous one and is never reused past one request. Any fetch failure
/// surfaces immediately; pages are never skipped.
#[derive(Debug)]
pub struct PageIterator {
    transport: Arc<RestTransport>,
    endpoint: Endpoint,
    query: Vec<(String, String)>,
    buffer: VecDeque<Record>,
    next_token: Option<String>,
    has_more: bool,
    fetched: bool,
}

impl PageIterator {
    pub fn new(
        transport: Arc<RestTransport>,
        endpoint: Endpoint,
        query: Vec<(String, String)>,
    ) -> Self {
        Self {
            transport,
            endpoint,
            query,
            buffer: VecDeque::new(),
            next_token: None,
            has_more: true,
            fetched: false,
        }
    }

    pub async fn try_next(&mut self) -> Result<Option<Record>, ClientError> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            if self.fetched && !self.has_more {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<(), ClientError> {
        let mut query = self.query.clone();
        if let Some(token) = &self.next_token {
            query.push((String::from("nextPageToken"), token.clone()));
        }
        let envelope = self
            .transport
            .get_envelope::<Record>(self.endpoint.clone(), query)
            .await?;

        self.fetched = true;
        self.next_token = envelope.next_page_token;
        // Activity-style endpoints signal continuation via `moreResult` (the
        // token may repeat); the rest stop once no cursor accompanies an
        // exhausted page.
        self.has_more = envelope
            .more_result
            .unwrap_or_else(|| self.next_token.is_some());
        self.buffer = envelope.result.into();
        Ok(())
    }
}

impl RecordStream for PageIterator {
    fn try_next<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, ClientError>> + Send + 'a>> {
        Box::pin(Self::try_next(self))
    }
}

/// Which child endpoint a [`ParentChildIterator`] fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    LeadsByList,
    LeadsByProgram,
}

impl ChildKind {
    fn endpoint(self, parent_id: String) -> Endpoint {
        match self {
            Self::LeadsByList => Endpoint::LeadsByList { list_id: parent_id },
            Self::LeadsByProgram => Endpoint::LeadsByProgram {
                program_id: parent_id,
            },
        }
    }
}

/// Flattens leads across parent entities (lists or programs) into one lazy
/// sequence: parents in vendor order, and within each parent the vendor's
/// page order. A fresh child iterator is opened per parent id.
pub struct ParentChildIterator {
    transport: Arc<RestTransport>,
    parents: PageIterator,
    child_kind: ChildKind,
    child_query: Vec<(String, String)>,
    current: Option<PageIterator>,
}

impl ParentChildIterator {
    pub fn new(
        transport: Arc<RestTransport>,
        parents: PageIterator,
        child_kind: ChildKind,
        fields: &[String],
    ) -> Self {
        let batch_size = transport.config().effective_batch_size().to_string();
        let child_query = vec![
            (String::from("fields"), fields.join(",")),
            (String::from("batchSize"), batch_size),
        ];
        Self {
            transport,
            parents,
            child_kind,
            child_query,
            current: None,
        }
    }

    pub async fn try_next(&mut self) -> Result<Option<Record>, ClientError> {
        loop {
            if let Some(child) = self.current.as_mut() {
                if let Some(record) = child.try_next().await? {
                    return Ok(Some(record));
                }
                self.current = None;
            }
            match self.parents.try_next().await? {
                Some(parent) => {
                    let id = parent_id(&parent)?;
                    self.current = Some(PageIterator::new(
                        Arc::clone(&self.transport),
                        self.child_kind.endpoint(id),
                        self.child_query.clone(),
                    ));
                }
                None => return Ok(None),
            }
        }
    }
}

impl RecordStream for ParentChildIterator {
    fn try_next<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Record>, ClientError>> + Send + 'a>> {
        Box::pin(Self::try_next(self))
    }
}

fn parent_id(record: &Record) -> Result<String, ClientError> {
    match record.get("id") {
        Some(serde_json::Value::String(value)) => Ok(value.clone()),
        Some(serde_json::Value::Number(value)) => Ok(value.to_string()),
        _ => Err(ClientError::Payload(String::from(
            "parent record missing id field",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::ScriptedHttpClient;
    use std::time::Duration;

    fn test_transport(http: Arc<ScriptedHttpClient>) -> Arc<RestTransport> {
        let mut config = ClientConfig::new("https://example.mktorest.com", "id", "secret");
        config.request_interval = Duration::from_millis(1);
        config.batch_size = 300;
        Arc::new(RestTransport::new(http, Arc::new(config)))
    }

    fn enqueue_token(http: &ScriptedHttpClient) {
        http.enqueue_json(r#"{"access_token": "tok"}"#);
    }

    #[tokio::test]
    async fn iterates_across_pages_using_the_cursor() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        http.enqueue_json(
            r#"{"success": true, "result": [{"id": 1}], "nextPageToken": "PAGE2"}"#,
        );
        http.enqueue_json(r#"{"success": true, "result": [{"id": 2}]}"#);

        let mut iterator = PageIterator::new(
            test_transport(Arc::clone(&http)),
            Endpoint::Lists,
            Vec::new(),
        );

        let first = iterator.try_next().await.expect("fetch").expect("record");
        assert_eq!(first["id"], 1);
        let second = iterator.try_next().await.expect("fetch").expect("record");
        assert_eq!(second["id"], 2);
        assert!(iterator.try_next().await.expect("fetch").is_none());

        let requests = http.requests();
        // Token fetch, first page, second page with the cursor.
        assert_eq!(requests.len(), 3);
        assert!(requests[2]
            .query
            .contains(&(String::from("nextPageToken"), String::from("PAGE2"))));
    }

    #[tokio::test]
    async fn more_result_false_ends_even_with_a_token_present() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        http.enqueue_json(
            r#"{"success": true, "result": [{"id": 1}], "nextPageToken": "SAME", "moreResult": false}"#,
        );

        let mut iterator = PageIterator::new(
            test_transport(Arc::clone(&http)),
            Endpoint::Campaigns,
            Vec::new(),
        );

        assert!(iterator.try_next().await.expect("fetch").is_some());
        assert!(iterator.try_next().await.expect("fetch").is_none());
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn empty_first_page_without_cursor_is_end_of_sequence() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        http.enqueue_json(r#"{"success": true, "result": []}"#);

        let mut iterator = PageIterator::new(
            test_transport(Arc::clone(&http)),
            Endpoint::Lists,
            Vec::new(),
        );
        assert!(iterator.try_next().await.expect("fetch").is_none());
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_immediately() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        http.enqueue_json(
            r#"{"success": false, "errors": [{"code": "1013", "message": "Object not found"}]}"#,
        );

        let mut iterator = PageIterator::new(
            test_transport(Arc::clone(&http)),
            Endpoint::Lists,
            Vec::new(),
        );
        let error = iterator.try_next().await.expect_err("fatal vendor error");
        assert!(matches!(error, ClientError::Api(_)));
    }

    #[tokio::test]
    async fn flattens_leads_in_list_order_then_page_order() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        // Parent page: two lists.
        http.enqueue_json(r#"{"success": true, "result": [{"id": 1}, {"id": 2}]}"#);
        // Children of list 1, then list 2.
        http.enqueue_json(r#"{"success": true, "result": [{"id": "lead1"}]}"#);
        http.enqueue_json(r#"{"success": true, "result": [{"id": "lead2"}]}"#);

        let transport = test_transport(Arc::clone(&http));
        let parents = PageIterator::new(Arc::clone(&transport), Endpoint::Lists, Vec::new());
        let fields = vec![String::from("field1"), String::from("field2")];
        let mut iterator =
            ParentChildIterator::new(transport, parents, ChildKind::LeadsByList, &fields);

        let first = iterator.try_next().await.expect("fetch").expect("record");
        assert_eq!(first["id"], "lead1");
        let second = iterator.try_next().await.expect("fetch").expect("record");
        assert_eq!(second["id"], "lead2");
        assert!(iterator.try_next().await.expect("fetch").is_none());

        let requests = http.requests();
        assert!(requests[2].url.ends_with("/rest/v1/list/1/leads.json"));
        assert!(requests[3].url.ends_with("/rest/v1/list/2/leads.json"));
        // Field selection is one comma-joined string.
        assert!(requests[2]
            .query
            .contains(&(String::from("fields"), String::from("field1,field2"))));
    }

    #[tokio::test]
    async fn parent_without_id_is_a_payload_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        enqueue_token(&http);
        http.enqueue_json(r#"{"success": true, "result": [{"name": "no id here"}]}"#);

        let transport = test_transport(Arc::clone(&http));
        let parents = PageIterator::new(Arc::clone(&transport), Endpoint::Programs, Vec::new());
        let mut iterator =
            ParentChildIterator::new(transport, parents, ChildKind::LeadsByProgram, &[]);

        let error = iterator.try_next().await.expect_err("missing id");
        assert!(matches!(error, ClientError::Payload(_)));
    }
}
