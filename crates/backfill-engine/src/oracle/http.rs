//! HTTP transport for oracle queries

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{normalize_value, Oracle, OracleError, OracleQuery};

#[derive(Serialize)]
struct LocalRequest<'a> {
    chain: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct LocalResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

/// Sends `{chain, code}` to `{base_url}/chain/{chain}/local` and expects
/// `{status, result}` back
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracle {
    /// `timeout` bounds every request so a stuck node turns into an error.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn local_url(&self, chain: &str) -> String {
        format!("{}/chain/{}/local", self.base_url, chain)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn query(&self, query: &OracleQuery) -> Result<BigDecimal, OracleError> {
        let response = self
            .client
            .post(self.local_url(&query.chain))
            .json(&LocalRequest {
                chain: &query.chain,
                code: &query.code,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: LocalResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        if body.status != "success" {
            return Err(OracleError::Status {
                status: body.status,
                detail: body.result.to_string(),
            });
        }

        normalize_value(&body.result)
    }
}
