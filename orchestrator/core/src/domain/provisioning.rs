// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Provisioning Provider Interface
//!
//! Anti-corruption layer over the confidential-computing provider. The
//! provider provisions in two phases:
//!
//! 1. **Declare** registers the workload descriptor (with secret placeholders
//!    only) and hands back an enclave public key plus the descriptor hash.
//! 2. **Commit** starts the billable instance with the sealed secret envelope.
//!
//! Declare alone creates no compute, so a failed Commit leaves nothing to
//! clean up remotely. The provider's status vocabulary is normalized into
//! [`RemoteStatus`] here; mapping onto [`BotStatus`](crate::domain::bot::BotStatus)
//! is the reconciler's job.
//!
//! Implementations live in `crate::infrastructure::phala`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::bot::InstanceSize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-side instance status, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    /// `starting` or `creating`
    Starting,
    /// `stopped` or `exited`
    Stopped,
    /// `error` or `failed`
    Failed,
    Other(String),
}

impl RemoteStatus {
    pub fn parse(status: &str) -> Self {
        let normalized = status.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "running" => RemoteStatus::Running,
            "starting" | "creating" => RemoteStatus::Starting,
            "stopped" | "exited" => RemoteStatus::Stopped,
            "error" | "failed" => RemoteStatus::Failed,
            _ => RemoteStatus::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Running => "running",
            RemoteStatus::Starting => "starting",
            RemoteStatus::Stopped => "stopped",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeclareRequest {
    /// Provider-side workload name
    pub name: String,
    pub size: InstanceSize,
    /// Compose descriptor; secret-bearing fields are `${KEY}` placeholders
    pub descriptor: String,
    /// Names of the keys the enclave will receive in the sealed envelope
    pub secret_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredApp {
    pub app_id: String,
    /// Hex-encoded X25519 key generated inside the provider's KMS
    pub enclave_public_key: String,
    /// Content hash of the exact descriptor that was declared
    pub descriptor_hash: String,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub app_id: String,
    pub descriptor_hash: String,
    /// Hex envelope produced by the secret encryptor
    pub encrypted_env: String,
    pub secret_keys: Vec<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedInstance {
    pub instance_id: InstanceId,
    pub app_id: Option<String>,
    pub status: RemoteStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub instance_id: Option<InstanceId>,
    pub app_id: Option<String>,
    pub name: Option<String>,
    pub status: RemoteStatus,
    pub endpoints: Vec<String>,
}

impl InstanceState {
    pub fn primary_endpoint(&self) -> Option<&str> {
        self.endpoints
            .iter()
            .map(String::as_str)
            .find(|endpoint| !endpoint.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProvisioningError {
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Provisioning provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provisioning provider rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid response from provisioning provider: {0}")]
    InvalidResponse(String),
}

impl ProvisioningError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisioningError::NotFound(_))
    }
}

/// Remote confidential-computing provider
#[async_trait]
pub trait ProvisioningProvider: Send + Sync {
    /// Phase 1: register the descriptor and obtain the enclave key
    async fn declare(&self, request: &DeclareRequest) -> Result<DeclaredApp, ProvisioningError>;

    /// Phase 2: start the instance with the sealed environment
    async fn commit(&self, request: &CommitRequest) -> Result<CommittedInstance, ProvisioningError>;

    async fn get_status(&self, instance_id: &InstanceId) -> Result<InstanceState, ProvisioningError>;

    async fn list_instances(&self) -> Result<Vec<InstanceState>, ProvisioningError>;

    async fn restart(&self, instance_id: &InstanceId) -> Result<(), ProvisioningError>;

    /// Delete by application or instance id. "Not found" is a successful outcome.
    async fn delete(&self, external_id: &str) -> Result<DeleteOutcome, ProvisioningError>;

    /// Tail of the instance's container logs
    async fn logs(&self, instance_id: &InstanceId, tail: u32) -> Result<String, ProvisioningError>;

    /// Provider-issued TEE quote for the instance
    async fn attestation(&self, instance_id: &InstanceId) -> Result<serde_json::Value, ProvisioningError>;
}

/// Short-timeout readiness check against a workload's own endpoint
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, endpoint: &str) -> bool;
}
