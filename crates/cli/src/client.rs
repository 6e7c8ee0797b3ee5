//! API client for the rebalancer daemon

use anyhow::{Context, Result};
use rebalancer_lib::StatusSnapshot;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// HTTP client for the daemon's status API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach the rebalancer daemon")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to reach the rebalancer daemon")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.get("api/v1/status").await
    }

    /// Report a spot node as being reclaimed
    pub async fn interrupt(&self, node: &str) -> Result<InterruptionAccepted> {
        self.post(
            "api/v1/interruptions",
            &InterruptionRequest {
                node: node.to_string(),
            },
        )
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionRequest {
    pub node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionAccepted {
    pub node: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_parses_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "cluster": "aks-prod",
                    "mode": "production",
                    "cycles_completed": 4,
                    "cycles_failed": 1,
                    "nodes": [{
                        "name": "aks-spot-1",
                        "class": "preemptible",
                        "pod_count": 3,
                        "cpu_used": 1.2,
                        "cpu_allocatable": 4.0,
                        "memory_used_gib": 3.0,
                        "memory_allocatable_gib": 16.0
                    }],
                    "last_cycle": null,
                    "last_error": "observing cluster state: timeout",
                    "last_interruption": null,
                    "scaling": null,
                    "window": null
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = client.status().await.unwrap();

        assert_eq!(status.cluster, "aks-prod");
        assert_eq!(status.cycles_failed, 1);
        assert_eq!(status.nodes[0].pod_count, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/interruptions")
            .with_status(503)
            .with_body(r#"{"error":"rebalance loop has stopped"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.interrupt("aks-spot-1").await.unwrap_err();

        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("rebalance loop has stopped"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
