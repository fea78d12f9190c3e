// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Bot Aggregate
//!
//! The workload record the orchestrator drives from a spawn request to a
//! running, secret-provisioned enclave and, eventually, to `terminated`.
//!
//! All status and secret-staging mutations go through the methods on [`Bot`]
//! so the aggregate keeps its own invariants:
//!
//! - staged secrets exist only while the status is `pending_payment` or
//!   `provisioning`, and are dropped in the same mutation that records the
//!   external instance id;
//! - `terminated` is never left once reached.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Bot identity, lifecycle status and size catalog

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::provisioning::InstanceId;

/// Model used when a spawn request does not name one
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-20250514";

const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub Uuid);

impl BotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for BotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the owning user, as asserted by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BotValidationError {
    #[error("Invalid bot name '{0}': use 2-24 lowercase letters, digits or hyphens")]
    InvalidName(String),

    #[error("Unknown instance size '{0}'. Supported: small, medium")]
    UnknownSize(String),

    #[error("Unknown bot status '{0}'")]
    UnknownStatus(String),

    #[error("Missing required secret: {0}")]
    MissingSecret(&'static str),

    #[error("Secret key '{0}' is reserved by the platform")]
    ReservedKey(String),

    #[error("Invalid secret key '{0}': use letters, digits and underscores")]
    InvalidKey(String),
}

/// Human bot name (DNS label format, unique per owner among live bots)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotName(String);

impl BotName {
    pub fn parse(name: &str) -> Result<Self, BotValidationError> {
        let valid_len = (NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name.len());
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if !valid_len || !valid_chars {
            return Err(BotValidationError::InvalidName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    PendingPayment,
    Provisioning,
    Starting,
    Booting,
    Running,
    Stopped,
    Error,
    Terminating,
    Terminated,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::PendingPayment => "pending_payment",
            BotStatus::Provisioning => "provisioning",
            BotStatus::Starting => "starting",
            BotStatus::Booting => "booting",
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Error => "error",
            BotStatus::Terminating => "terminating",
            BotStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BotStatus::Terminated)
    }

    /// Deployed but not yet confirmed healthy
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            BotStatus::Provisioning | BotStatus::Starting | BotStatus::Booting
        )
    }

    /// States whose remote counterpart is folded in on read
    pub fn is_reconcilable(&self) -> bool {
        self.is_pre_run() || matches!(self, BotStatus::Running)
    }

    pub fn may_hold_secrets(&self) -> bool {
        matches!(self, BotStatus::PendingPayment | BotStatus::Provisioning)
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = BotValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(BotStatus::PendingPayment),
            "provisioning" => Ok(BotStatus::Provisioning),
            "starting" => Ok(BotStatus::Starting),
            "booting" => Ok(BotStatus::Booting),
            "running" => Ok(BotStatus::Running),
            "stopped" => Ok(BotStatus::Stopped),
            "error" => Ok(BotStatus::Error),
            "terminating" => Ok(BotStatus::Terminating),
            "terminated" => Ok(BotStatus::Terminated),
            other => Err(BotValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Hardware and price figures for one size tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeSpec {
    pub vcpu: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    /// What the provider charges the platform per hour
    pub cost_per_hour: f64,
    /// What the platform bills the owner per hour
    pub retail_per_hour: f64,
    pub instance_type: &'static str,
}

const SMALL_SPEC: SizeSpec = SizeSpec {
    vcpu: 1,
    memory_mb: 2048,
    disk_gb: 20,
    cost_per_hour: 0.058,
    retail_per_hour: 0.12,
    instance_type: "tdx.small",
};

const MEDIUM_SPEC: SizeSpec = SizeSpec {
    vcpu: 2,
    memory_mb: 4096,
    disk_gb: 40,
    cost_per_hour: 0.116,
    retail_per_hour: 0.24,
    instance_type: "tdx.medium",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    #[default]
    Small,
    Medium,
}

impl InstanceSize {
    pub const ALL: [InstanceSize; 2] = [InstanceSize::Small, InstanceSize::Medium];

    pub fn spec(&self) -> &'static SizeSpec {
        match self {
            InstanceSize::Small => &SMALL_SPEC,
            InstanceSize::Medium => &MEDIUM_SPEC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceSize::Small => "small",
            InstanceSize::Medium => "medium",
        }
    }
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceSize {
    type Err = BotValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(InstanceSize::Small),
            "medium" => Ok(InstanceSize::Medium),
            other => Err(BotValidationError::UnknownSize(other.to_string())),
        }
    }
}

/// Plaintext secrets held between spawn and delivery into the enclave
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSecrets {
    pub bot_token: String,
    pub api_key: String,
    pub owner_id: String,

    /// Free-form personality text (delivered as SOUL_MD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,

    /// Structured agent configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,

    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl fmt::Debug for PendingSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSecrets")
            .field("bot_token", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .field("owner_id", &"[REDACTED]")
            .field("personality", &self.personality.as_ref().map(|_| "[REDACTED]"))
            .field("config", &self.config.as_ref().map(|_| "[REDACTED]"))
            .field("custom_keys", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Bot {
    pub id: BotId,
    pub owner: OwnerId,
    pub name: BotName,
    pub model: String,
    pub size: InstanceSize,

    /// Provider application id (assigned by Declare)
    pub app_id: Option<String>,
    /// Provider instance id (assigned by Commit)
    pub instance_id: Option<InstanceId>,
    /// Enclave key the secrets were sealed to, captured once at provisioning
    pub enclave_public_key: Option<String>,
    /// Network endpoint last reported by the provider
    pub endpoint: Option<String>,

    pub pending_secrets: Option<PendingSecrets>,

    pub status: BotStatus,
    /// Operator-facing detail for the current status (failure reason)
    pub status_detail: Option<String>,
    /// When the current boot attempt began; bounds how long `booting` may last
    pub boot_started_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Bot {
    /// Stage a new bot with its secrets. Billing-gated bots wait in
    /// `pending_payment`, everything else starts at `provisioning`.
    pub fn stage(
        owner: OwnerId,
        name: BotName,
        model: impl Into<String>,
        size: InstanceSize,
        secrets: PendingSecrets,
        awaiting_payment: bool,
    ) -> Self {
        let now = Utc::now();
        let status = if awaiting_payment {
            BotStatus::PendingPayment
        } else {
            BotStatus::Provisioning
        };

        Self {
            id: BotId::new(),
            owner,
            name,
            model: model.into(),
            size,
            app_id: None,
            instance_id: None,
            enclave_public_key: None,
            endpoint: None,
            pending_secrets: Some(secrets),
            status,
            status_detail: None,
            boot_started_at: None,
            created_at: now,
            updated_at: now,
            terminated_at: None,
        }
    }

    pub fn has_pending_secrets(&self) -> bool {
        self.pending_secrets.is_some()
    }

    pub fn begin_provisioning(&mut self) {
        self.status = BotStatus::Provisioning;
        self.status_detail = None;
        self.touch();
    }

    /// Capture the external identifiers and drop the staged secrets in one step.
    pub fn record_deployment(
        &mut self,
        app_id: String,
        instance_id: InstanceId,
        enclave_public_key: String,
        now: DateTime<Utc>,
    ) {
        self.app_id = Some(app_id);
        self.instance_id = Some(instance_id);
        self.enclave_public_key = Some(enclave_public_key);
        self.pending_secrets = None;
        self.status = BotStatus::Starting;
        self.status_detail = None;
        self.boot_started_at = Some(now);
        self.touch();
    }

    /// Secrets are purged as well: `error` is not a state that may hold them.
    pub fn mark_error(&mut self, detail: impl Into<String>) {
        self.status = BotStatus::Error;
        self.status_detail = Some(detail.into());
        self.pending_secrets = None;
        self.touch();
    }

    /// `mark_error` for a failed deploy whose remote leftovers could not be
    /// deleted. The ids stay on the record so termination retries the delete.
    pub fn mark_error_with_orphans(
        &mut self,
        app_id: Option<String>,
        instance_id: Option<InstanceId>,
        detail: impl Into<String>,
    ) {
        if app_id.is_some() {
            self.app_id = app_id;
        }
        if instance_id.is_some() {
            self.instance_id = instance_id;
        }
        self.mark_error(detail);
    }

    /// Move to `status`, returning whether anything changed. A terminated
    /// bot never transitions again.
    pub fn apply_status(&mut self, status: BotStatus) -> bool {
        if self.status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        if status != BotStatus::Error {
            self.status_detail = None;
        }
        self.touch();
        true
    }

    pub fn observe_endpoint(&mut self, endpoint: &str) -> bool {
        if self.endpoint.as_deref() == Some(endpoint) {
            return false;
        }
        self.endpoint = Some(endpoint.to_string());
        self.touch();
        true
    }

    pub fn mark_restarted(&mut self, now: DateTime<Utc>) {
        self.status = BotStatus::Provisioning;
        self.status_detail = None;
        self.boot_started_at = Some(now);
        self.touch();
    }

    /// Put back the status captured before a teardown attempt that could not
    /// confirm any delete.
    pub fn restore_status(&mut self, status: BotStatus, detail: Option<String>) {
        self.status = status;
        self.status_detail = detail;
        self.touch();
    }

    pub fn mark_terminated(&mut self, now: DateTime<Utc>) {
        self.status = BotStatus::Terminated;
        self.status_detail = None;
        self.pending_secrets = None;
        self.terminated_at = Some(now);
        self.touch();
    }

    /// Identifiers to try when deleting the remote resource, most preferred first
    pub fn external_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(2);
        if let Some(app_id) = self.app_id.as_deref().filter(|id| !id.is_empty()) {
            ids.push(app_id.to_string());
        }
        if let Some(instance) = self.instance_id.as_ref().filter(|id| !id.as_str().is_empty()) {
            if !ids.iter().any(|id| id == instance.as_str()) {
                ids.push(instance.as_str().to_string());
            }
        }
        ids
    }

    pub fn boot_deadline_passed(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.boot_started_at {
            Some(started) => now - started > timeout,
            None => false,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
