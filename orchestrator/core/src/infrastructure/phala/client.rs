// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Phala Cloud Provisioning Adapter
//
// Anti-Corruption Layer for the Phala Cloud CVM API. Wire shapes are
// tolerated loosely (ids may be strings or numbers, list responses may be
// wrapped in `data`) and normalized into the domain provisioning types.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::platform_config::{resolve_secret, ProvisioningConfig};
use crate::domain::provisioning::{
    CommitRequest, CommittedInstance, DeclareRequest, DeclaredApp, DeleteOutcome, InstanceId,
    InstanceState, ProvisioningError, ProvisioningProvider, RemoteStatus,
};

const API_KEY_HEADER: &str = "X-API-Key";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct PhalaClient {
    base_url: String,
    api_key: String,
    /// Retries transient failures
    client: ClientWithMiddleware,
    /// Used for Commit, which starts billable compute
    commit_client: ClientWithMiddleware,
}

#[derive(Serialize)]
struct ProvisionBody<'a> {
    name: &'a str,
    compose_file: ComposeFileBody<'a>,
    vcpu: u32,
    memory: u32,
    disk_size: u32,
    instance_type: &'a str,
    env_keys: &'a [String],
}

#[derive(Serialize)]
struct ComposeFileBody<'a> {
    docker_compose_file: &'a str,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    #[serde(default)]
    app_id: Option<serde_json::Value>,
    #[serde(default)]
    app_env_encrypt_pubkey: Option<String>,
    #[serde(default)]
    compose_hash: Option<String>,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    app_id: &'a str,
    compose_hash: &'a str,
    encrypted_env: &'a str,
    env_keys: &'a [String],
}

#[derive(Deserialize, Default)]
struct CvmResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    vm_uuid: Option<serde_json::Value>,
    #[serde(default)]
    app_id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    endpoints: Vec<CvmEndpoint>,
    /// Older API versions report a single endpoint
    #[serde(default)]
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct CvmEndpoint {
    #[serde(default)]
    app: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CvmList {
    Wrapped { data: Vec<CvmResponse> },
    Bare(Vec<CvmResponse>),
}

/// Ids are strings on current API versions and integers on some older ones
fn id_string(value: &Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl CvmResponse {
    fn instance_id(&self) -> Option<InstanceId> {
        id_string(&self.vm_uuid)
            .or_else(|| id_string(&self.id))
            .map(InstanceId::new)
    }

    fn into_state(self) -> InstanceState {
        let mut endpoints: Vec<String> = self
            .endpoints
            .iter()
            .filter_map(|e| e.app.clone())
            .filter(|e| !e.is_empty())
            .collect();
        if let Some(legacy) = self.endpoint.clone().filter(|e| !e.is_empty()) {
            if !endpoints.contains(&legacy) {
                endpoints.push(legacy);
            }
        }

        InstanceState {
            instance_id: self.instance_id(),
            app_id: id_string(&self.app_id),
            name: self.name.clone(),
            status: RemoteStatus::parse(self.status.as_deref().unwrap_or("unknown")),
            endpoints,
        }
    }
}

fn transport_error(err: reqwest_middleware::Error) -> ProvisioningError {
    ProvisioningError::Unavailable(err.to_string())
}

/// 404 → NotFound, 408/429/5xx → Unavailable, other 4xx → Rejected
fn status_error(status: StatusCode, body: String) -> ProvisioningError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body);
    if status == StatusCode::NOT_FOUND {
        ProvisioningError::NotFound(detail)
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ProvisioningError::Unavailable(detail)
    } else {
        ProvisioningError::Rejected(detail)
    }
}

async fn read_success(response: reqwest::Response) -> Result<String, ProvisioningError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProvisioningError::Unavailable(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        return Err(status_error(status, body));
    }
    Ok(body)
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ProvisioningError> {
    serde_json::from_str(body)
        .map_err(|e| ProvisioningError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ProvisioningError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProvisioningError::Unavailable(format!("Failed to build HTTP client: {}", e)))
}

impl PhalaClient {
    pub fn new(config: &ProvisioningConfig, api_key: String) -> Result<Self, ProvisioningError> {
        let base = http_client(config.request_timeout())?;

        let policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(10))
            .build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(base.clone())
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build();

        let commit_client = if config.retry_commit {
            client.clone()
        } else {
            ClientBuilder::new(base).build()
        };

        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            client,
            commit_client,
        })
    }

    /// Build from configuration, resolving an `env:` API key
    pub fn from_config(config: &ProvisioningConfig) -> anyhow::Result<Self> {
        let api_key = resolve_secret(&config.api_key)?
            .ok_or_else(|| anyhow::anyhow!("provisioning.api_key is not configured"))?;
        Ok(Self::new(config, api_key)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ProvisioningProvider for PhalaClient {
    async fn declare(&self, request: &DeclareRequest) -> Result<DeclaredApp, ProvisioningError> {
        let spec = request.size.spec();
        let body = ProvisionBody {
            name: &request.name,
            compose_file: ComposeFileBody {
                docker_compose_file: &request.descriptor,
            },
            vcpu: spec.vcpu,
            memory: spec.memory_mb,
            disk_size: spec.disk_gb,
            instance_type: spec.instance_type,
            env_keys: &request.secret_keys,
        };

        debug!(name = %request.name, size = %request.size, "Declaring enclave application");
        let response = self
            .client
            .post(self.url("/cvms/provision"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: ProvisionResponse = parse_json(&read_success(response).await?)?;

        let app_id = id_string(&parsed.app_id)
            .ok_or_else(|| ProvisioningError::InvalidResponse("missing app_id".to_string()))?;
        let enclave_public_key = parsed
            .app_env_encrypt_pubkey
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProvisioningError::InvalidResponse("missing app_env_encrypt_pubkey".to_string()))?;
        let descriptor_hash = parsed
            .compose_hash
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProvisioningError::InvalidResponse("missing compose_hash".to_string()))?;

        Ok(DeclaredApp {
            app_id,
            enclave_public_key,
            descriptor_hash,
        })
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommittedInstance, ProvisioningError> {
        let body = CommitBody {
            app_id: &request.app_id,
            compose_hash: &request.descriptor_hash,
            encrypted_env: &request.encrypted_env,
            env_keys: &request.secret_keys,
        };

        debug!(app_id = %request.app_id, "Committing enclave instance");
        let response = self
            .commit_client
            .post(self.url("/cvms"))
            .header(API_KEY_HEADER, &self.api_key)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let cvm: CvmResponse = parse_json(&read_success(response).await?)?;
        let instance_id = cvm
            .instance_id()
            .ok_or_else(|| ProvisioningError::InvalidResponse("missing vm_uuid and id".to_string()))?;

        Ok(CommittedInstance {
            instance_id,
            app_id: id_string(&cvm.app_id),
            status: cvm
                .status
                .as_deref()
                .map(RemoteStatus::parse)
                .unwrap_or(RemoteStatus::Starting),
        })
    }

    async fn get_status(&self, instance_id: &InstanceId) -> Result<InstanceState, ProvisioningError> {
        let response = self
            .client
            .get(self.url(&format!("/cvms/{}", instance_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let cvm: CvmResponse = parse_json(&read_success(response).await?)?;
        let mut state = cvm.into_state();
        if state.instance_id.is_none() {
            state.instance_id = Some(instance_id.clone());
        }
        Ok(state)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceState>, ProvisioningError> {
        let response = self
            .client
            .get(self.url("/cvms"))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let list: CvmList = parse_json(&read_success(response).await?)?;
        let cvms = match list {
            CvmList::Wrapped { data } => data,
            CvmList::Bare(cvms) => cvms,
        };
        Ok(cvms.into_iter().map(CvmResponse::into_state).collect())
    }

    async fn restart(&self, instance_id: &InstanceId) -> Result<(), ProvisioningError> {
        let response = self
            .client
            .post(self.url(&format!("/cvms/{}/restart", instance_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        read_success(response).await?;
        Ok(())
    }

    async fn delete(&self, external_id: &str) -> Result<DeleteOutcome, ProvisioningError> {
        let response = self
            .client
            .delete(self.url(&format!("/cvms/{}", external_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        match read_success(response).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ProvisioningError::NotFound(_)) => {
                warn!(external_id = %external_id, "Remote resource already gone");
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(e) => Err(e),
        }
    }

    async fn logs(&self, instance_id: &InstanceId, tail: u32) -> Result<String, ProvisioningError> {
        let response = self
            .client
            .get(self.url(&format!("/cvms/{}/logs?tail={}", instance_id, tail)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        read_success(response).await
    }

    async fn attestation(&self, instance_id: &InstanceId) -> Result<serde_json::Value, ProvisioningError> {
        let response = self
            .client
            .get(self.url(&format!("/cvms/{}/attestation", instance_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        parse_json(&read_success(response).await?)
    }
}
