//! Marketo REST endpoint catalog and URL building.

use crate::config::ClientConfig;
use crate::model::BulkEntity;

/// Closed set of endpoints the client talks to. URL building lives here so
/// the rest of the client never concatenates paths by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    AccessToken,
    Lists,
    Programs,
    Campaigns,
    DescribeLead,
    LeadsByList { list_id: String },
    LeadsByProgram { program_id: String },
    CreateExtract { entity: BulkEntity },
    EnqueueExtract { entity: BulkEntity, job_id: String },
    ExtractStatus { entity: BulkEntity, job_id: String },
    ExtractFile { entity: BulkEntity, job_id: String },
}

impl Endpoint {
    /// Full request URL for this endpoint against the configured instance.
    pub fn url(&self, config: &ClientConfig) -> String {
        let base = config.endpoint.trim_end_matches('/');
        match self {
            Self::AccessToken => format!(
                "{}/oauth/token",
                config.identity_endpoint.trim_end_matches('/')
            ),
            Self::Lists => format!("{base}/rest/v1/lists.json"),
            Self::Programs => format!("{base}/rest/asset/v1/programs.json"),
            Self::Campaigns => format!("{base}/rest/v1/campaigns.json"),
            Self::DescribeLead => format!("{base}/rest/v1/leads/describe.json"),
            Self::LeadsByList { list_id } => {
                format!("{base}/rest/v1/list/{list_id}/leads.json")
            }
            Self::LeadsByProgram { program_id } => {
                format!("{base}/rest/v1/leads/programs/{program_id}.json")
            }
            Self::CreateExtract { entity } => format!(
                "{base}/bulk/v1/{}/export/create.json",
                entity.path_segment()
            ),
            Self::EnqueueExtract { entity, job_id } => format!(
                "{base}/bulk/v1/{}/export/{job_id}/enqueue.json",
                entity.path_segment()
            ),
            Self::ExtractStatus { entity, job_id } => format!(
                "{base}/bulk/v1/{}/export/{job_id}/status.json",
                entity.path_segment()
            ),
            Self::ExtractFile { entity, job_id } => format!(
                "{base}/bulk/v1/{}/export/{job_id}/file.json",
                entity.path_segment()
            ),
        }
    }
}
