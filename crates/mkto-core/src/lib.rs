//! Core client for the Marketo REST API.
//!
//! This crate contains:
//! - Client configuration and the retry/backoff policy
//! - OAuth token lifecycle and vendor error classification
//! - Paced, retrying REST transport over a pluggable HTTP client
//! - Bulk-extract job orchestration (create, enqueue, poll, download)
//! - Lazy cursor-pagination iterators and the service facade

pub mod bulk;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod model;
pub mod paging;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod token;
pub mod transport;

pub use bulk::{BulkExtract, ExportStatus, ExtractEntity, ExtractRequest};
pub use config::{ClientConfig, RetryPolicy, PREVIEW_RECORD_LIMIT};
pub use endpoint::Endpoint;
pub use error::ClientError;
pub use model::{
    AccessToken, BulkEntity, DownloadRange, JobStatus, MarketoDataType, MarketoError,
    MarketoField, MarketoResponse, Record,
};
pub use paging::{ChildKind, PageIterator, ParentChildIterator, RecordStream};
pub use rate_limit::RequestPacer;
pub use retry::{classify, Backoff, RetryDecision};
pub use service::{MarketoService, RecordSink};
pub use token::TokenManager;
pub use transport::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    RestTransport, ScriptedHttpClient,
};
