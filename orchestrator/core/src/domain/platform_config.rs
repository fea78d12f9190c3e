// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Platform Configuration Types
//
// Defines the configuration schema for a Clawster orchestrator process:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Provisioning provider endpoint, credentials and retry policy
// - Lifecycle timing (liveness probe, boot timeout)
// - Billing mode (bypass or Stripe-gated)
// - Usage metering, storage backend and observability settings

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::bot::{InstanceSize, DEFAULT_MODEL};
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "ClawsterConfig";
pub const CONFIG_PATH_ENV: &str = "CLAWSTER_CONFIG_PATH";
pub const DEFAULT_IMAGE: &str = "ghcr.io/mcclowin/openclaw-tee:latest";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClawsterConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ClawsterConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ClawsterConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClawsterConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub metering: MeteringConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Provider API base URL
    #[serde(default = "default_provisioning_endpoint")]
    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(default = "default_provisioning_api_key")]
    pub api_key: Option<String>,

    /// Container image the enclave runs
    #[serde(default = "default_image")]
    pub image: String,

    /// Prefix for provider-side workload names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries for transient failures on idempotent calls
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Also retry Commit. Only safe when the provider honours Idempotency-Key.
    #[serde(default)]
    pub retry_commit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_ms: u64,

    /// How long a bot may stay `booting` before it is marked `error`
    #[serde(default = "default_boot_timeout")]
    pub boot_timeout_secs: u64,

    #[serde(default = "default_model")]
    pub default_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingMode {
    /// Deploy immediately, no payment collection
    #[default]
    Bypass,
    /// Stage at `pending_payment` and deploy on checkout completion
    Stripe,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub mode: BillingMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe: Option<StripeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,

    /// Secret API key (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Webhook signing secret (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,

    /// Price used when a size has no dedicated price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_price_id: Option<String>,

    #[serde(default)]
    pub price_ids: StripePriceIds,

    #[serde(default = "default_success_url")]
    pub success_url: String,

    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,

    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StripePriceIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metering_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Connection string (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_provisioning_endpoint() -> String {
    "https://cloud-api.phala.network/api/v1".to_string()
}

fn default_provisioning_api_key() -> Option<String> {
    Some("env:PHALA_API_KEY".to_string())
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_name_prefix() -> String {
    "clawster".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_liveness_timeout() -> u64 {
    3000
}

fn default_boot_timeout() -> u64 {
    900
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

fn default_success_url() -> String {
    "http://localhost:3000/dashboard?checkout=success".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/dashboard?checkout=cancelled".to_string()
}

fn default_webhook_tolerance() -> u64 {
    300
}

fn default_metering_interval() -> u64 {
    3600
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            endpoint: default_provisioning_endpoint(),
            api_key: default_provisioning_api_key(),
            image: default_image(),
            name_prefix: default_name_prefix(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_commit: false,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: default_liveness_timeout(),
            boot_timeout_secs: default_boot_timeout(),
            default_model: default_model(),
        }
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base: default_stripe_api_base(),
            secret_key: None,
            webhook_secret: None,
            default_price_id: None,
            price_ids: StripePriceIds::default(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_metering_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for ClawsterConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "clawster".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ClawsterConfigSpec::default(),
        }
    }
}

impl StripeConfig {
    /// Price for a size: the size-specific price, else the default price
    pub fn price_for(&self, size: InstanceSize) -> Option<&str> {
        let specific = match size {
            InstanceSize::Small => self.price_ids.small.as_deref(),
            InstanceSize::Medium => self.price_ids.medium.as_deref(),
        };
        specific.or(self.default_price_id.as_deref())
    }
}

impl ProvisioningConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LifecycleConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn boot_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.boot_timeout_secs as i64)
    }
}

/// Resolve a configured secret value (supports "env:VAR_NAME" syntax)
pub fn resolve_secret(value: &Option<String>) -> anyhow::Result<Option<String>> {
    match value {
        Some(v) => match v.strip_prefix("env:") {
            Some(var_name) => std::env::var(var_name)
                .map(Some)
                .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
            None => Ok(Some(v.clone())),
        },
        None => Ok(None),
    }
}

impl ClawsterConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. CLAWSTER_CONFIG_PATH environment variable
    /// 2. ./clawster-config.yaml (working directory)
    /// 3. ~/.clawster/config.yaml (user home)
    /// 4. /etc/clawster/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./clawster-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".clawster").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/clawster/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .with_context(|| format!("Failed to load config at {:?}", path))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)
                .with_context(|| format!("Failed to load config at {:?}", config_path))?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the environment
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let spec = &mut self.spec;

        if let Some(key) = lookup("PHALA_API_KEY") {
            tracing::info!("Environment override: PHALA_API_KEY");
            spec.provisioning.api_key = Some(key);
        }
        if let Some(image) = lookup("OPENCLAW_IMAGE") {
            tracing::info!("Environment override: OPENCLAW_IMAGE={}", image);
            spec.provisioning.image = image;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            tracing::info!("Environment override: DATABASE_URL (postgres backend)");
            spec.storage.backend = StorageBackendKind::Postgres;
            spec.storage.database_url = Some(url);
        }

        if let Some(mode) = lookup("CLAWSTER_BILLING_MODE") {
            match mode.to_lowercase().as_str() {
                "bypass" => spec.billing.mode = BillingMode::Bypass,
                "stripe" => spec.billing.mode = BillingMode::Stripe,
                _ => {
                    tracing::warn!(
                        "Invalid value for CLAWSTER_BILLING_MODE: '{}'. Expected bypass/stripe. Ignoring.",
                        mode
                    );
                }
            }
        }

        let stripe_keys = [
            "STRIPE_SECRET_KEY",
            "STRIPE_WEBHOOK_SECRET",
            "STRIPE_PRICE_ID",
            "STRIPE_PRICE_ID_SMALL",
            "STRIPE_PRICE_ID_MEDIUM",
            "FRONTEND_URL",
        ];
        if stripe_keys.iter().any(|key| lookup(key).is_some()) {
            let stripe = spec.billing.stripe.get_or_insert_with(StripeConfig::default);
            if let Some(key) = lookup("STRIPE_SECRET_KEY") {
                tracing::info!("Environment override: STRIPE_SECRET_KEY");
                stripe.secret_key = Some(key);
            }
            if let Some(secret) = lookup("STRIPE_WEBHOOK_SECRET") {
                stripe.webhook_secret = Some(secret);
            }
            if let Some(price) = lookup("STRIPE_PRICE_ID") {
                stripe.default_price_id = Some(price);
            }
            if let Some(price) = lookup("STRIPE_PRICE_ID_SMALL") {
                stripe.price_ids.small = Some(price);
            }
            if let Some(price) = lookup("STRIPE_PRICE_ID_MEDIUM") {
                stripe.price_ids.medium = Some(price);
            }
            if let Some(frontend) = lookup("FRONTEND_URL") {
                let base = frontend.trim_end_matches('/');
                stripe.success_url = format!("{}/dashboard?checkout=success", base);
                stripe.cancel_url = format!("{}/dashboard?checkout=cancelled", base);
            }
        }
    }

    /// Storage backend selected by this configuration
    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.spec.storage.backend {
            StorageBackendKind::Memory => Ok(StorageBackend::InMemory),
            StorageBackendKind::Postgres => {
                let connection_string = resolve_secret(&self.spec.storage.database_url)?
                    .ok_or_else(|| anyhow::anyhow!("storage.database_url is required for the postgres backend"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string,
                    max_connections: self.spec.storage.max_connections,
                }))
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.provisioning.endpoint.is_empty() {
            anyhow::bail!("provisioning.endpoint cannot be empty");
        }
        if spec.provisioning.request_timeout_secs == 0 {
            anyhow::bail!("provisioning.request_timeout_secs must be greater than zero");
        }
        if spec.lifecycle.liveness_timeout_ms == 0 {
            anyhow::bail!("lifecycle.liveness_timeout_ms must be greater than zero");
        }
        if spec.lifecycle.boot_timeout_secs == 0 {
            anyhow::bail!("lifecycle.boot_timeout_secs must be greater than zero");
        }
        if spec.metering.interval_secs == 0 {
            anyhow::bail!("metering.interval_secs must be greater than zero");
        }

        if spec.storage.backend == StorageBackendKind::Postgres && spec.storage.database_url.is_none() {
            anyhow::bail!("storage.database_url is required for the postgres backend");
        }

        if spec.billing.mode == BillingMode::Stripe {
            let stripe = spec
                .billing
                .stripe
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("billing.stripe is required when billing.mode is 'stripe'"))?;

            if stripe.secret_key.is_none() {
                anyhow::bail!("billing.stripe.secret_key is required");
            }
            if stripe.webhook_secret.is_none() {
                anyhow::bail!("billing.stripe.webhook_secret is required");
            }
            for size in InstanceSize::ALL {
                if stripe.price_for(size).is_none() {
                    anyhow::bail!("No Stripe price configured for instance size '{}'", size);
                }
            }
        }

        Ok(())
    }
}
