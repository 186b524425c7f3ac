//! Outbound transport for failure reports

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use super::FailureReport;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Report sink rejected report with status {0}")]
    Rejected(u16),
}

/// Destination for classified failure reports
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, report: &FailureReport) -> Result<(), ReportError>;
}

/// Posts each report as JSON to an HTTP endpoint
pub struct HttpFailureSink {
    client: reqwest::Client,
    url: String,
}

impl HttpFailureSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FailureSink for HttpFailureSink {
    async fn report(&self, report: &FailureReport) -> Result<(), ReportError> {
        let mut context = report.context.clone();
        context.insert("phase".to_string(), json!(report.phase));
        context.insert("callsite".to_string(), json!(report.callsite));
        context.insert("timestamp".to_string(), json!(report.timestamp));

        let body = json!({
            "endpoint": report.endpoint,
            "error": report.message,
            "severity": report.severity,
            "context": context,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(ReportError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}
