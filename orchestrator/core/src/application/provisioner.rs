// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Enclave Provisioner - combined two-phase spawn
//!
//! Declare (descriptor with placeholders) → seal the environment to the
//! enclave key → Commit. The provisioner never cleans up on its own: a
//! failure reports the remote identifiers it left behind so the deployment
//! service can delete them before recording the error.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates the provider's declare/commit protocol

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::error::OrchestratorError;
use crate::domain::bot::{BotId, BotName, InstanceSize};
use crate::domain::provisioning::{
    CommitRequest, CommittedInstance, DeclareRequest, InstanceId, ProvisioningError,
    ProvisioningProvider, RemoteStatus,
};
use crate::domain::secrets::{key_names, EnvVar};
use crate::infrastructure::crypto::seal_env;
use crate::infrastructure::phala::compose;

#[derive(Debug, Clone)]
pub struct SpawnedEnclave {
    pub app_id: String,
    pub instance: CommittedInstance,
    pub enclave_public_key: String,
}

/// A failed spawn, with whatever remote identifiers it left behind.
#[derive(Debug)]
pub struct SpawnFailure {
    pub error: OrchestratorError,
    pub app_id: Option<String>,
    pub instance_id: Option<InstanceId>,
}

impl SpawnFailure {
    pub fn clean(error: impl Into<OrchestratorError>) -> Self {
        Self {
            error: error.into(),
            app_id: None,
            instance_id: None,
        }
    }

    fn leaving(error: impl Into<OrchestratorError>, app_id: &str, instance_id: Option<&InstanceId>) -> Self {
        Self {
            error: error.into(),
            app_id: Some(app_id.to_string()),
            instance_id: instance_id.cloned(),
        }
    }

    /// Ids to delete, most specific first
    pub fn orphans(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if let Some(instance_id) = &self.instance_id {
            ids.push(instance_id.as_str().to_string());
        }
        if let Some(app_id) = &self.app_id {
            if !ids.iter().any(|id| id == app_id) {
                ids.push(app_id.clone());
            }
        }
        ids
    }
}

pub struct EnclaveProvisioner {
    provider: Arc<dyn ProvisioningProvider>,
    image: String,
    name_prefix: String,
}

impl EnclaveProvisioner {
    pub fn new(
        provider: Arc<dyn ProvisioningProvider>,
        image: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            image: image.into(),
            name_prefix: name_prefix.into(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ProvisioningProvider> {
        &self.provider
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub async fn spawn(
        &self,
        bot_id: BotId,
        name: &BotName,
        size: InstanceSize,
        env: &[EnvVar],
    ) -> Result<SpawnedEnclave, SpawnFailure> {
        let service = compose::service_name(&self.name_prefix, name.as_str());
        let secret_keys = key_names(env);

        let descriptor = compose::render(&service, &self.image, name.as_str(), &secret_keys)
            .map_err(|e| {
                SpawnFailure::clean(OrchestratorError::Validation(format!(
                    "could not render compose descriptor: {}",
                    e
                )))
            })?;

        let declared = self
            .provider
            .declare(&DeclareRequest {
                name: service.clone(),
                size,
                descriptor,
                secret_keys: secret_keys.clone(),
            })
            .await
            .map_err(SpawnFailure::clean)?;

        debug!(
            bot_id = %bot_id,
            app_id = %declared.app_id,
            descriptor_hash = %declared.descriptor_hash,
            "Declared enclave application"
        );

        let encrypted_env = seal_env(env, &declared.enclave_public_key)
            .map_err(|e| SpawnFailure::leaving(e, &declared.app_id, None))?;

        let instance = self
            .provider
            .commit(&CommitRequest {
                app_id: declared.app_id.clone(),
                descriptor_hash: declared.descriptor_hash.clone(),
                encrypted_env,
                secret_keys,
                idempotency_key: format!("{}:{}", bot_id, declared.descriptor_hash),
            })
            .await
            .map_err(|e| SpawnFailure::leaving(e, &declared.app_id, None))?;

        if instance.status == RemoteStatus::Failed {
            warn!(
                bot_id = %bot_id,
                instance_id = %instance.instance_id,
                "Commit returned an instance that already failed"
            );
            return Err(SpawnFailure::leaving(
                ProvisioningError::Rejected(format!(
                    "instance {} reported status {} at creation",
                    instance.instance_id,
                    instance.status.as_str()
                )),
                &declared.app_id,
                Some(&instance.instance_id),
            ));
        }

        info!(
            bot_id = %bot_id,
            app_id = %declared.app_id,
            instance_id = %instance.instance_id,
            status = instance.status.as_str(),
            "Enclave committed"
        );

        Ok(SpawnedEnclave {
            app_id: instance.app_id.clone().unwrap_or(declared.app_id),
            instance,
            enclave_public_key: declared.enclave_public_key,
        })
    }
}
