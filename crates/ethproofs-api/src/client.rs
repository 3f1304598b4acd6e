//! HTTP client for the EthProofs submission API.

use std::time::Duration;

use reqwest::Url;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::{EthProofsError, Result},
    types::{ProofResponse, ProvedProof, ProvingProof, QueuedProof},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the EthProofs submission API.
///
/// All requests carry a bearer token and a 30-second timeout. A non-2xx
/// response surfaces as [`EthProofsError::Api`] with the body the server
/// returned; a 200 whose body carries `{"error": …}` surfaces as
/// [`EthProofsError::Rejected`].
#[derive(Debug, Clone)]
pub struct EthProofsClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl EthProofsClient {
    /// Create a new client for the given API base URL.
    ///
    /// A missing trailing slash on the base path would make [`Url::join`]
    /// replace the last path segment, so one is appended here.
    pub fn new(mut base_url: Url, api_key: impl Into<String>) -> Self {
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Report that a block is queued for proving.
    pub async fn queued(&self, request: &QueuedProof) -> Result<ProofResponse> {
        self.post("proofs/queued", request).await
    }

    /// Report that proving has started for a block.
    pub async fn proving(&self, request: &ProvingProof) -> Result<ProofResponse> {
        self.post("proofs/proving", request).await
    }

    /// Report a finished proof.
    pub async fn proved(&self, request: &ProvedProof) -> Result<ProofResponse> {
        self.post("proofs/proved", request).await
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = self.base_url.join(endpoint)?;

        let response = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EthProofsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Some deployments answer 200 with an error body instead of a
        // non-success status.
        let value = response.json::<serde_json::Value>().await?;
        if let Some(error) = value.get("error") {
            return Err(EthProofsError::Rejected(error.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_without_trailing_slash_keeps_its_path() {
        let client = EthProofsClient::new(
            Url::parse("https://api.ethproofs.org/v1").unwrap(),
            "key",
        );
        assert_eq!(
            client.base_url.join("proofs/queued").unwrap().as_str(),
            "https://api.ethproofs.org/v1/proofs/queued"
        );
    }
}
