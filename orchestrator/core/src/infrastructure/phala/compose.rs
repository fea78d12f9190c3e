// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Compose descriptor for a bot enclave.
//
// The descriptor is declared to the provider in plaintext and becomes part
// of the attested measurement, so it carries only `${KEY}` placeholders.
// The values arrive later inside the sealed envelope.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::secrets::BOT_NAME_KEY;

const GATEWAY_PORT: &str = "3000:3000";
const SECRETS_PORT: &str = "3001:3001";

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    environment: Vec<String>,
    ports: Vec<String>,
    restart: String,
}

/// Service name used for both the compose service and the provider workload
pub fn service_name(prefix: &str, bot_name: &str) -> String {
    format!("{}-{}", prefix, bot_name)
}

/// Render the docker-compose document for `bot_name`.
pub fn render(
    service: &str,
    image: &str,
    bot_name: &str,
    secret_keys: &[String],
) -> Result<String, serde_yaml::Error> {
    let mut environment = Vec::with_capacity(secret_keys.len() + 1);
    environment.push(format!("{}={}", BOT_NAME_KEY, bot_name));
    environment.extend(secret_keys.iter().map(|key| format!("{}=${{{}}}", key, key)));

    let mut services = BTreeMap::new();
    services.insert(
        service.to_string(),
        ComposeService {
            image: image.to_string(),
            environment,
            ports: vec![GATEWAY_PORT.to_string(), SECRETS_PORT.to_string()],
            restart: "unless-stopped".to_string(),
        },
    );

    serde_yaml::to_string(&ComposeFile { services })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_has_placeholders_only() {
        let keys = vec![
            "TELEGRAM_BOT_TOKEN".to_string(),
            "ANTHROPIC_API_KEY".to_string(),
        ];
        let yaml = render("clawster-jarvis", "ghcr.io/example/bot:1", "jarvis", &keys).unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let service = &doc["services"]["clawster-jarvis"];
        assert_eq!(service["image"].as_str(), Some("ghcr.io/example/bot:1"));
        assert_eq!(service["restart"].as_str(), Some("unless-stopped"));

        let env: Vec<&str> = service["environment"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(
            env,
            vec![
                "BOT_NAME=jarvis",
                "TELEGRAM_BOT_TOKEN=${TELEGRAM_BOT_TOKEN}",
                "ANTHROPIC_API_KEY=${ANTHROPIC_API_KEY}",
            ]
        );

        let ports: Vec<&str> = service["ports"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(ports, vec!["3000:3000", "3001:3001"]);
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("clawster", "jarvis"), "clawster-jarvis");
    }
}
