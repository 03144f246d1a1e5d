//! HTTP client for communicating with the Castellan API server.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Error envelope returned by the server on failure.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// How requests identify the caller.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    /// Session token sent as `Authorization: Bearer`.
    Bearer(String),
    /// API-key username and secret sent as HTTP Basic.
    ApiKey { username: String, secret: String },
}

impl Credentials {
    /// Parse `username:secret` into API-key credentials.
    pub fn api_key(pair: &str) -> Result<Self> {
        let (username, secret) = pair
            .split_once(':')
            .context("API key must be given as <username>:<secret>")?;
        Ok(Self::ApiKey {
            username: username.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// HTTP client for the Castellan API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::None => request,
            Credentials::Bearer(token) => request.bearer_auth(token),
            Credentials::ApiKey { username, secret } => request.basic_auth(username, Some(secret)),
        }
    }

    async fn decode<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => {
                    let field = envelope
                        .error
                        .details
                        .as_ref()
                        .and_then(|d| d.get("field"))
                        .and_then(|f| f.as_str())
                        .map(|f| format!(" (field: {})", f))
                        .unwrap_or_default();
                    anyhow::bail!(
                        "{} {}: {}{}",
                        status.as_u16(),
                        envelope.error.code,
                        envelope.error.message,
                        field
                    );
                }
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// Perform a GET request and deserialize the response body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        Self::decode(&url, resp).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        Self::decode(&url, resp).await
    }

    /// Perform a POST request without a body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.post(&url))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        Self::decode(&url, resp).await
    }

    /// Perform a DELETE request and deserialize the response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;
        Self::decode(&url, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_credentials_split_on_first_colon() {
        match Credentials::api_key("3f2a:cst_abc:def").unwrap() {
            Credentials::ApiKey { username, secret } => {
                assert_eq!(username, "3f2a");
                assert_eq!(secret, "cst_abc:def");
            }
            other => panic!("unexpected credentials: {:?}", other),
        }
        assert!(Credentials::api_key("no-separator").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://localhost:8080/", Credentials::None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
    }
}
