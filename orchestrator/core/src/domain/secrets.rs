// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Enclave environment assembly
//!
//! Turns a bot's staged secrets into the ordered environment the enclave
//! receives inside the encrypted envelope. Platform-owned keys are reserved:
//! user-supplied custom keys may never shadow them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::domain::bot::{BotValidationError, PendingSecrets};

pub const BOT_TOKEN_KEY: &str = "TELEGRAM_BOT_TOKEN";
pub const API_KEY_KEY: &str = "ANTHROPIC_API_KEY";
pub const OWNER_ID_KEY: &str = "TELEGRAM_OWNER_ID";
pub const GATEWAY_TOKEN_KEY: &str = "OPENCLAW_GATEWAY_TOKEN";
pub const CONFIG_KEY: &str = "OPENCLAW_CONFIG";
pub const MODEL_KEY: &str = "DEFAULT_MODEL";
pub const NODE_OPTIONS_KEY: &str = "NODE_OPTIONS";
pub const PERSONALITY_KEY: &str = "SOUL_MD";
pub const BOT_NAME_KEY: &str = "BOT_NAME";

const NODE_OPTIONS_VALUE: &str = "--max-old-space-size=1536";

/// Keys the platform sets itself
pub const RESERVED_KEYS: &[&str] = &[
    BOT_TOKEN_KEY,
    API_KEY_KEY,
    OWNER_ID_KEY,
    GATEWAY_TOKEN_KEY,
    CONFIG_KEY,
    MODEL_KEY,
    NODE_OPTIONS_KEY,
    PERSONALITY_KEY,
    BOT_NAME_KEY,
];

/// Substrings that mark a log line as possibly carrying a credential
const SECRET_MARKERS: &[&str] = &["api_key=", "bot_token=", "sk-ant-", "sk-", "token="];

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvVar({}=[REDACTED])", self.key)
    }
}

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.iter().any(|reserved| reserved.eq_ignore_ascii_case(key))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate staged secrets before anything leaves the platform.
pub fn validate_secrets(secrets: &PendingSecrets) -> Result<(), BotValidationError> {
    if secrets.bot_token.trim().is_empty() {
        return Err(BotValidationError::MissingSecret("bot_token"));
    }
    if secrets.api_key.trim().is_empty() {
        return Err(BotValidationError::MissingSecret("api_key"));
    }
    if secrets.owner_id.trim().is_empty() {
        return Err(BotValidationError::MissingSecret("owner_id"));
    }
    validate_custom_keys(&secrets.custom)
}

pub fn validate_custom_keys(custom: &BTreeMap<String, String>) -> Result<(), BotValidationError> {
    for key in custom.keys() {
        if is_reserved(key) {
            return Err(BotValidationError::ReservedKey(key.clone()));
        }
        if !is_valid_key(key) {
            return Err(BotValidationError::InvalidKey(key.clone()));
        }
    }
    Ok(())
}

/// Build the enclave environment in delivery order. Reserved or malformed
/// custom keys are dropped here as well, never forwarded.
pub fn assemble_env(model: &str, secrets: &PendingSecrets) -> Result<Vec<EnvVar>, serde_json::Error> {
    let mut env = vec![
        EnvVar::new(BOT_TOKEN_KEY, &secrets.bot_token),
        EnvVar::new(API_KEY_KEY, &secrets.api_key),
        EnvVar::new(OWNER_ID_KEY, &secrets.owner_id),
        EnvVar::new(MODEL_KEY, model),
        EnvVar::new(NODE_OPTIONS_KEY, NODE_OPTIONS_VALUE),
    ];

    if let Some(personality) = secrets.personality.as_deref().filter(|p| !p.is_empty()) {
        env.push(EnvVar::new(PERSONALITY_KEY, personality));
    }

    if let Some(config) = &secrets.config {
        env.push(EnvVar::new(CONFIG_KEY, serde_json::to_string(config)?));
    }

    for (key, value) in &secrets.custom {
        if is_reserved(key) || !is_valid_key(key) {
            warn!(key = %key, "Dropping custom secret key that may not be forwarded");
            continue;
        }
        env.push(EnvVar::new(key, value));
    }

    Ok(env)
}

pub fn key_names(env: &[EnvVar]) -> Vec<String> {
    env.iter().map(|var| var.key.clone()).collect()
}

/// Remove log lines that look like they carry a credential.
pub fn filter_secret_lines(logs: &str) -> String {
    logs.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !SECRET_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> PendingSecrets {
        PendingSecrets {
            bot_token: "t".to_string(),
            api_key: "k".to_string(),
            owner_id: "123".to_string(),
            personality: None,
            config: None,
            custom: BTreeMap::new(),
        }
    }

    #[test]
    fn test_required_env_order() {
        let env = assemble_env("anthropic/claude-sonnet-4-20250514", &secrets()).unwrap();
        let keys = key_names(&env);
        assert_eq!(
            keys,
            vec![
                "TELEGRAM_BOT_TOKEN",
                "ANTHROPIC_API_KEY",
                "TELEGRAM_OWNER_ID",
                "DEFAULT_MODEL",
                "NODE_OPTIONS",
            ]
        );
        assert_eq!(env[3].value, "anthropic/claude-sonnet-4-20250514");
    }

    #[test]
    fn test_optional_entries_follow_required() {
        let mut staged = secrets();
        staged.personality = Some("You are Jarvis.".to_string());
        staged.config = Some(serde_json::json!({"channels": ["telegram"]}));
        staged.custom.insert("WEATHER_KEY".to_string(), "w".to_string());
        staged.custom.insert("ALPHA".to_string(), "a".to_string());

        let env = assemble_env("m", &staged).unwrap();
        let keys = key_names(&env);
        assert_eq!(&keys[5..], &["SOUL_MD", "OPENCLAW_CONFIG", "ALPHA", "WEATHER_KEY"]);
        assert_eq!(env[6].value, r#"{"channels":["telegram"]}"#);
    }

    #[test]
    fn test_reserved_custom_key_rejected() {
        let mut staged = secrets();
        staged.custom.insert("TELEGRAM_BOT_TOKEN".to_string(), "evil".to_string());
        assert_eq!(
            validate_secrets(&staged),
            Err(BotValidationError::ReservedKey("TELEGRAM_BOT_TOKEN".to_string()))
        );

        let mut lowercase = secrets();
        lowercase.custom.insert("openclaw_gateway_token".to_string(), "x".to_string());
        assert!(validate_secrets(&lowercase).is_err());
    }

    #[test]
    fn test_reserved_custom_key_dropped_on_assembly() {
        let mut staged = secrets();
        staged.custom.insert("TELEGRAM_BOT_TOKEN".to_string(), "evil".to_string());
        staged.custom.insert("OK_KEY".to_string(), "fine".to_string());

        let env = assemble_env("m", &staged).unwrap();
        let tokens: Vec<_> = env.iter().filter(|v| v.key == "TELEGRAM_BOT_TOKEN").collect();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, "t");
        assert!(env.iter().any(|v| v.key == "OK_KEY"));
    }

    #[test]
    fn test_missing_and_malformed_secrets() {
        let mut staged = secrets();
        staged.api_key = "  ".to_string();
        assert_eq!(
            validate_secrets(&staged),
            Err(BotValidationError::MissingSecret("api_key"))
        );

        let mut bad_key = secrets();
        bad_key.custom.insert("1BAD-KEY".to_string(), "v".to_string());
        assert!(matches!(
            validate_secrets(&bad_key),
            Err(BotValidationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_filter_secret_lines() {
        let logs = "booting gateway\nANTHROPIC_API_KEY=sk-ant-123\nconnected to telegram\nauth token=abc";
        assert_eq!(filter_secret_lines(logs), "booting gateway\nconnected to telegram");
    }
}
