//! Thin HTTP client for the node API.

use clap::Args;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Where the node's API listens.
#[derive(Args, Debug, Clone)]
pub struct Endpoint {
    /// API endpoint of the node.
    #[arg(short, long, default_value = "http://127.0.0.1:9835")]
    pub endpoint: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    code: i32,
    message: String,
}

pub struct ApiClient {
    endpoint: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            endpoint: endpoint.endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.endpoint, path)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        tracing::debug!(path, "GET");
        let resp = self.http.get(self.url(path)).query(query).send().await?;
        Self::decode(resp).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        tracing::debug!(path, "POST");
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        match resp.json::<ErrorResponse>().await {
            Ok(err) => anyhow::bail!("{} (code {})", err.message, err.code),
            Err(_) => anyhow::bail!("request failed (HTTP {})", status),
        }
    }
}

/// Print a JSON value the way every listing command does.
pub fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
