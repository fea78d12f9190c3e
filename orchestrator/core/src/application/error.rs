// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application-facing error taxonomy.
//!
//! Every boundary error (`ProvisioningError`, `EncryptionError`,
//! `BillingError`, `RepositoryError`, `BotValidationError`) converts into
//! [`OrchestratorError`], which the presentation layer maps onto HTTP status
//! codes.

use thiserror::Error;

use crate::domain::billing::BillingError;
use crate::domain::bot::BotValidationError;
use crate::domain::provisioning::ProvisioningError;
use crate::domain::repository::RepositoryError;
use crate::infrastructure::crypto::EncryptionError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Bot not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provisioning(ProvisioningError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("External service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("External resource not found: {0}")]
    ExternalNotFound(String),

    #[error("Termination failed: {0}")]
    TerminationFailed(String),

    #[error("Persistence error: {0}")]
    Repository(RepositoryError),
}

impl OrchestratorError {
    /// Short machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::PaymentRequired(_) => "payment_required",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::Provisioning(_) => "provisioning_error",
            OrchestratorError::Encryption(_) => "encryption_error",
            OrchestratorError::ExternalUnavailable(_) => "external_unavailable",
            OrchestratorError::ExternalNotFound(_) => "external_not_found",
            OrchestratorError::TerminationFailed(_) => "termination_failed",
            OrchestratorError::Repository(_) => "persistence_error",
        }
    }
}

impl From<ProvisioningError> for OrchestratorError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::NotFound(detail) => OrchestratorError::ExternalNotFound(detail),
            ProvisioningError::Unavailable(detail) => OrchestratorError::ExternalUnavailable(detail),
            other => OrchestratorError::Provisioning(other),
        }
    }
}

impl From<RepositoryError> for OrchestratorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(detail) => OrchestratorError::Conflict(detail),
            RepositoryError::NotFound(detail) => OrchestratorError::NotFound(detail),
            other => OrchestratorError::Repository(other),
        }
    }
}

impl From<BotValidationError> for OrchestratorError {
    fn from(err: BotValidationError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

impl From<BillingError> for OrchestratorError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature(_) | BillingError::MalformedPayload(_) => {
                OrchestratorError::Validation(err.to_string())
            }
            BillingError::Unavailable(_) | BillingError::Rejected(_) | BillingError::MissingPrice(_) => {
                OrchestratorError::ExternalUnavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_are_classified() {
        assert!(matches!(
            OrchestratorError::from(ProvisioningError::NotFound("x".into())),
            OrchestratorError::ExternalNotFound(_)
        ));
        assert!(matches!(
            OrchestratorError::from(ProvisioningError::Unavailable("x".into())),
            OrchestratorError::ExternalUnavailable(_)
        ));
        assert!(matches!(
            OrchestratorError::from(ProvisioningError::Rejected("x".into())),
            OrchestratorError::Provisioning(_)
        ));
    }

    #[test]
    fn test_repository_conflict_is_conflict() {
        let err = OrchestratorError::from(RepositoryError::Conflict("dup".into()));
        assert_eq!(err.kind(), "conflict");
        let err = OrchestratorError::from(RepositoryError::Database("down".into()));
        assert_eq!(err.kind(), "persistence_error");
    }

    #[test]
    fn test_bad_signature_is_validation() {
        let err = OrchestratorError::from(BillingError::InvalidSignature("nope".into()));
        assert_eq!(err.kind(), "validation_error");
    }
}
