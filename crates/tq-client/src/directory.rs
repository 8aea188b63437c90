//! Report directory collaborator: batch summaries and per-batch records.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tq_core::{BatchStats, Report};
use tracing::debug;

pub const DETAIL_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Message supplied by the server in its error body.
    #[error("{0}")]
    Server(String),
    #[error("Server error: {0}")]
    Status(u16),
    #[error("Network error: Could not connect to server")]
    Network,
    #[error("invalid response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ReportDirectory: Send + Sync {
    async fn fetch_batch_summaries(&self) -> Result<Vec<BatchStats>, DirectoryError>;

    async fn fetch_batch_detail(&self, batch_id: &str) -> Result<Vec<Report>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct FormsPage {
    #[serde(default)]
    forms: Vec<Report>,
}

#[derive(Debug, Clone)]
pub struct HttpReportDirectory {
    client: Client,
    base: String,
}

impl HttpReportDirectory {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DirectoryError::Decode(format!("http client setup failed: {err}")))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let url = self.url(path);
        debug!(event = "directory_request", url = %url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| {
                debug!(event = "directory_network_error", url = %url, error = %err);
                DirectoryError::Network
            })?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| DirectoryError::Decode(err.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<Value>().await.ok();
    Err(error_from_body(status, body.as_ref()))
}

/// Server message first, then its `error` field, then the bare status.
pub fn error_from_body(status: StatusCode, body: Option<&Value>) -> DirectoryError {
    let field = |name: &str| {
        body.and_then(|body| body.get(name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };
    match field("message").or_else(|| field("error")) {
        Some(message) => DirectoryError::Server(message),
        None => DirectoryError::Status(status.as_u16()),
    }
}

#[async_trait]
impl ReportDirectory for HttpReportDirectory {
    async fn fetch_batch_summaries(&self) -> Result<Vec<BatchStats>, DirectoryError> {
        let envelope: DataEnvelope<Vec<BatchStats>> =
            self.get_json("/estate/reports/batch-stats", &[]).await?;
        Ok(envelope.data)
    }

    async fn fetch_batch_detail(&self, batch_id: &str) -> Result<Vec<Report>, DirectoryError> {
        let query = [
            ("batchId", batch_id.to_string()),
            ("page", "1".to_string()),
            ("limit", DETAIL_PAGE_LIMIT.to_string()),
        ];
        let envelope: DataEnvelope<FormsPage> = self.get_json("/estate/reports", &query).await?;
        Ok(envelope.data.forms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_prefers_message_over_error_field() {
        let body = json!({"message": "Batch not found", "error": "E404"});
        assert_eq!(
            error_from_body(StatusCode::NOT_FOUND, Some(&body)),
            DirectoryError::Server("Batch not found".to_string())
        );
        let body = json!({"error": "token expired"});
        assert_eq!(
            error_from_body(StatusCode::UNAUTHORIZED, Some(&body)).to_string(),
            "token expired"
        );
    }

    #[test]
    fn error_falls_back_to_status_code() {
        let body = json!({"message": "  "});
        let err = error_from_body(StatusCode::BAD_GATEWAY, Some(&body));
        assert_eq!(err, DirectoryError::Status(502));
        assert_eq!(err.to_string(), "Server error: 502");
        assert_eq!(
            DirectoryError::Network.to_string(),
            "Network error: Could not connect to server"
        );
    }

    #[test]
    fn detail_page_reads_forms() {
        let raw = r#"{"data":{"forms":[{"_id":"r1","batch_id":"B1","row_number":1}],"pagination":{"page":1,"total":1}}}"#;
        let envelope: DataEnvelope<FormsPage> = serde_json::from_str(raw).expect("page");
        assert_eq!(envelope.data.forms.len(), 1);
        assert_eq!(envelope.data.forms[0].batch_id, "B1");
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let directory =
            HttpReportDirectory::new("http://127.0.0.1:3000/api/", Duration::from_secs(1))
                .expect("client");
        assert_eq!(
            directory.url("/estate/reports/batch-stats"),
            "http://127.0.0.1:3000/api/estate/reports/batch-stats"
        );
    }
}
