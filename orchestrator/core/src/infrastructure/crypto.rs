// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Secret envelope sealing.
//!
//! Seals the enclave environment to the X25519 key the provider generated
//! for one application:
//!
//! ```text
//! ephemeral secret ─► X25519(remote pub) ─► shared secret (AES-256 key)
//!
//! envelope = hex( ephemeral_pub[32] || nonce[12] || ciphertext || tag[16] )
//! plaintext = {"env":[{"key":..,"value":..},..]}
//! ```
//!
//! A fresh ephemeral key and nonce are drawn for every envelope, so sealing
//! the same environment twice never yields the same output.

use aes_gcm::aead::{Aead, AeadCore};
use aes_gcm::{Aes256Gcm, KeyInit};
use rand_core::OsRng;
use serde::Serialize;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::domain::secrets::EnvVar;

/// X25519 public keys and AES-256 keys are both 32 bytes.
pub const KEY_SIZE: usize = 32;

pub const NONCE_SIZE: usize = 12;

pub const TAG_SIZE: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncryptionError {
    #[error("Invalid enclave public key: {0}")]
    InvalidPublicKey(String),

    #[error("Failed to serialize environment: {0}")]
    Serialization(String),

    #[error("Encryption failed: {0}")]
    Cipher(String),
}

#[derive(Serialize)]
struct EnvelopePayload<'a> {
    env: &'a [EnvVar],
}

/// Parse a hex key as delivered by the provider, with or without `0x`.
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey, EncryptionError> {
    let trimmed = hex_key.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes = hex::decode(stripped)
        .map_err(|e| EncryptionError::InvalidPublicKey(format!("not valid hex: {}", e)))?;

    let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        EncryptionError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ))
    })?;

    Ok(PublicKey::from(key))
}

/// Seal `env` to the enclave key. Returns the hex-encoded envelope.
pub fn seal_env(env: &[EnvVar], enclave_public_key: &str) -> Result<String, EncryptionError> {
    let remote = parse_public_key(enclave_public_key)?;

    let plaintext = serde_json::to_vec(&EnvelopePayload { env })
        .map_err(|e| EncryptionError::Serialization(e.to_string()))?;

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&remote);

    let cipher = Aes256Gcm::new_from_slice(shared.as_bytes())
        .map_err(|e| EncryptionError::Cipher(format!("Failed to create cipher: {}", e)))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

    let mut envelope = Vec::with_capacity(KEY_SIZE + NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);

    Ok(hex::encode(envelope))
}
