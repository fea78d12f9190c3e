// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::domain::provisioning::LivenessProbe;

/// `GET {endpoint}/health` with a short timeout; any 2xx counts as live.
pub struct HttpLivenessProbe {
    client: reqwest::Client,
}

impl HttpLivenessProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn is_live(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => {
                let live = response.status().is_success();
                debug!(endpoint = %endpoint, status = %response.status(), live, "Liveness probe");
                live
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Liveness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_success_and_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(204).create_async().await;

        let probe = HttpLivenessProbe::new(Duration::from_secs(3)).unwrap();
        assert!(probe.is_live(&server.url()).await);
        assert!(probe.is_live(&format!("{}/", server.url())).await);

        let mut failing = mockito::Server::new_async().await;
        failing.mock("GET", "/health").with_status(503).create_async().await;
        assert!(!probe.is_live(&failing.url()).await);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_not_live() {
        let probe = HttpLivenessProbe::new(Duration::from_millis(200)).unwrap();
        assert!(!probe.is_live("http://127.0.0.1:1").await);
    }
}
