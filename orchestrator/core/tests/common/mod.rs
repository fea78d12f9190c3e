// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};

use clawster_core::application::repository_factory::Repositories;
use clawster_core::application::{
    BotLifecycleService, Collaborators, OrchestratorSettings, SpawnRequest, StandardBotLifecycleService,
};
use clawster_core::domain::billing::{
    BillingError, BillingEvent, BillingProvider, CheckoutRequest, CheckoutSession,
};
use clawster_core::domain::bot::{Bot, BotId, OwnerId};
use clawster_core::domain::provisioning::{
    CommitRequest, CommittedInstance, DeclareRequest, DeclaredApp, DeleteOutcome, InstanceId,
    InstanceState, LivenessProbe, ProvisioningError, ProvisioningProvider, RemoteStatus,
};
use clawster_core::infrastructure::crypto::{KEY_SIZE, NONCE_SIZE};
use clawster_core::infrastructure::EventBus;

pub const ENDPOINT: &str = "http://jarvis.enclave.test";

#[derive(Default)]
pub struct ProviderLog {
    pub declares: Vec<DeclareRequest>,
    pub commits: Vec<CommitRequest>,
    pub deletes: Vec<String>,
    pub restarts: Vec<String>,
    pub status_calls: usize,
}

/// In-process stand-in for the confidential-computing provider
pub struct FakeProvider {
    enclave_secret: StaticSecret,
    pub log: Mutex<ProviderLog>,
    pub commit_error: Mutex<Option<ProvisioningError>>,
    pub commit_status: Mutex<RemoteStatus>,
    pub declare_error: Mutex<Option<ProvisioningError>>,
    /// Remote status per instance id; an absent id answers 404
    pub remote: Mutex<HashMap<String, InstanceState>>,
    pub status_error: Mutex<Option<ProvisioningError>>,
    /// Scripted delete results per external id; unscripted ids are deleted
    pub delete_results: Mutex<HashMap<String, Result<DeleteOutcome, ProvisioningError>>>,
    pub restart_error: Mutex<Option<ProvisioningError>>,
    pub logs: Mutex<String>,
    pub attestation_error: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            enclave_secret: StaticSecret::from([7u8; 32]),
            log: Mutex::new(ProviderLog::default()),
            commit_error: Mutex::new(None),
            commit_status: Mutex::new(RemoteStatus::Starting),
            declare_error: Mutex::new(None),
            remote: Mutex::new(HashMap::new()),
            status_error: Mutex::new(None),
            delete_results: Mutex::new(HashMap::new()),
            restart_error: Mutex::new(None),
            logs: Mutex::new(String::new()),
            attestation_error: AtomicBool::new(false),
        }
    }

    pub fn enclave_public_key(&self) -> String {
        hex::encode(PublicKey::from(&self.enclave_secret).as_bytes())
    }

    pub fn set_remote(&self, instance_id: &str, status: RemoteStatus, endpoint: Option<&str>) {
        self.remote.lock().insert(
            instance_id.to_string(),
            InstanceState {
                instance_id: Some(InstanceId::new(instance_id)),
                app_id: None,
                name: None,
                status,
                endpoints: endpoint.map(|e| vec![e.to_string()]).unwrap_or_default(),
            },
        );
    }

    pub fn script_delete(&self, external_id: &str, result: Result<DeleteOutcome, ProvisioningError>) {
        self.delete_results.lock().insert(external_id.to_string(), result);
    }

    pub fn commit_count(&self) -> usize {
        self.log.lock().commits.len()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.log.lock().deletes.clone()
    }

    /// Decrypt the envelope of the `n`th commit the way the enclave would.
    pub fn opened_env(&self, n: usize) -> Vec<(String, String)> {
        let envelope = self.log.lock().commits[n].encrypted_env.clone();
        let bytes = hex::decode(envelope).unwrap();
        let (ephemeral, rest) = bytes.split_at(KEY_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let ephemeral: [u8; KEY_SIZE] = ephemeral.try_into().unwrap();
        let shared = self.enclave_secret.diffie_hellman(&PublicKey::from(ephemeral));
        let cipher = Aes256Gcm::new_from_slice(shared.as_bytes()).unwrap();
        let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).unwrap();

        let payload: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        payload["env"]
            .as_array()
            .unwrap()
            .iter()
            .map(|var| {
                (
                    var["key"].as_str().unwrap().to_string(),
                    var["value"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl ProvisioningProvider for FakeProvider {
    async fn declare(&self, request: &DeclareRequest) -> Result<DeclaredApp, ProvisioningError> {
        if let Some(e) = self.declare_error.lock().clone() {
            return Err(e);
        }
        let mut log = self.log.lock();
        log.declares.push(request.clone());
        Ok(DeclaredApp {
            app_id: format!("app-{}", log.declares.len()),
            enclave_public_key: self.enclave_public_key(),
            descriptor_hash: format!("hash-{}", log.declares.len()),
        })
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommittedInstance, ProvisioningError> {
        let mut log = self.log.lock();
        log.commits.push(request.clone());
        if let Some(e) = self.commit_error.lock().clone() {
            return Err(e);
        }
        Ok(CommittedInstance {
            instance_id: InstanceId::new(format!("cvm-{}", log.commits.len())),
            app_id: Some(request.app_id.clone()),
            status: self.commit_status.lock().clone(),
        })
    }

    async fn get_status(&self, instance_id: &InstanceId) -> Result<InstanceState, ProvisioningError> {
        self.log.lock().status_calls += 1;
        if let Some(e) = self.status_error.lock().clone() {
            return Err(e);
        }
        self.remote
            .lock()
            .get(instance_id.as_str())
            .cloned()
            .ok_or_else(|| ProvisioningError::NotFound(instance_id.to_string()))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceState>, ProvisioningError> {
        Ok(self.remote.lock().values().cloned().collect())
    }

    async fn restart(&self, instance_id: &InstanceId) -> Result<(), ProvisioningError> {
        if let Some(e) = self.restart_error.lock().clone() {
            return Err(e);
        }
        self.log.lock().restarts.push(instance_id.to_string());
        Ok(())
    }

    async fn delete(&self, external_id: &str) -> Result<DeleteOutcome, ProvisioningError> {
        self.log.lock().deletes.push(external_id.to_string());
        self.delete_results
            .lock()
            .get(external_id)
            .cloned()
            .unwrap_or(Ok(DeleteOutcome::Deleted))
    }

    async fn logs(&self, _instance_id: &InstanceId, _tail: u32) -> Result<String, ProvisioningError> {
        Ok(self.logs.lock().clone())
    }

    async fn attestation(&self, instance_id: &InstanceId) -> Result<serde_json::Value, ProvisioningError> {
        if self.attestation_error.load(Ordering::SeqCst) {
            return Err(ProvisioningError::Unavailable("quote service down".to_string()));
        }
        Ok(serde_json::json!({ "quote": format!("quote-for-{}", instance_id) }))
    }
}

pub struct FakeProbe {
    pub live: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(live: bool) -> Self {
        Self {
            live: AtomicBool::new(live),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn is_live(&self, _endpoint: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.live.load(Ordering::SeqCst)
    }
}

/// Webhook payloads are `{"type": "paid"|"cancelled"|..., "bot_id": ...}` and
/// the only valid signature is `"valid"`.
pub struct FakeBilling {
    pub checkouts: Mutex<Vec<CheckoutRequest>>,
    pub fail_checkout: AtomicBool,
}

impl FakeBilling {
    pub fn new() -> Self {
        Self {
            checkouts: Mutex::new(Vec::new()),
            fail_checkout: AtomicBool::new(false),
        }
    }
}

pub fn webhook_payload(kind: &str, bot_id: BotId) -> Vec<u8> {
    serde_json::json!({ "type": kind, "bot_id": bot_id.to_string() })
        .to_string()
        .into_bytes()
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, BillingError> {
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(BillingError::Unavailable("checkout down".to_string()));
        }
        self.checkouts.lock().push(request.clone());
        Ok(CheckoutSession {
            id: "cs_test_1".to_string(),
            url: format!("https://pay.test/{}", request.bot_id),
        })
    }

    fn parse_webhook(&self, payload: &[u8], signature_header: &str) -> Result<Option<BillingEvent>, BillingError> {
        if signature_header != "valid" {
            return Err(BillingError::InvalidSignature("mismatch".to_string()));
        }
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
        let bot_id = value["bot_id"]
            .as_str()
            .and_then(|id| BotId::from_string(id).ok())
            .ok_or_else(|| BillingError::MalformedPayload("bot_id".to_string()))?;

        Ok(match value["type"].as_str() {
            Some("paid") => Some(BillingEvent::PaymentCompleted { bot_id }),
            Some("cancelled") => Some(BillingEvent::SubscriptionCancelled { bot_id }),
            _ => None,
        })
    }
}

pub struct Harness {
    pub service: StandardBotLifecycleService,
    pub provider: Arc<FakeProvider>,
    pub probe: Arc<FakeProbe>,
    pub billing: Option<Arc<FakeBilling>>,
    pub repositories: Repositories,
    pub event_bus: EventBus,
}

impl Harness {
    pub fn bypass() -> Self {
        Self::build(false, OrchestratorSettings::default())
    }

    pub fn gated() -> Self {
        Self::build(true, OrchestratorSettings::default())
    }

    pub fn build(with_billing: bool, settings: OrchestratorSettings) -> Self {
        let provider = Arc::new(FakeProvider::new());
        let probe = Arc::new(FakeProbe::new(false));
        let billing = with_billing.then(|| Arc::new(FakeBilling::new()));
        let repositories = Repositories::in_memory();
        let event_bus = EventBus::with_default_capacity();

        let service = StandardBotLifecycleService::new(
            Collaborators {
                bots: repositories.bots.clone(),
                usage: repositories.usage.clone(),
                provider: provider.clone(),
                probe: probe.clone(),
                billing: billing.clone().map(|b| b as Arc<dyn BillingProvider>),
                event_bus: event_bus.clone(),
            },
            settings,
        );

        Self {
            service,
            provider,
            probe,
            billing,
            repositories,
            event_bus,
        }
    }

    pub async fn stored(&self, id: BotId) -> Bot {
        self.repositories.bots.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn spawn(&self, name: &str) -> BotId {
        self.service
            .spawn(&owner(), spawn_request(name))
            .await
            .unwrap()
            .bot
            .id
    }
}

pub fn owner() -> OwnerId {
    OwnerId::new("u1")
}

pub fn spawn_request(name: &str) -> SpawnRequest {
    SpawnRequest {
        name: name.to_string(),
        model: None,
        size: Some("small".to_string()),
        telegram_token: "t".to_string(),
        api_key: "k".to_string(),
        owner_id: "123".to_string(),
        soul: None,
        config: None,
        custom_env: BTreeMap::new(),
    }
}
