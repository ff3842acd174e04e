//! Platform identities and their per-ledger account bindings.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{GlobalId, LedgerId, LocalAccountId};

/// A platform-level user. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub global_id: GlobalId,
    pub name: String,
}

/// Validate a display name before it reaches any ledger.
///
/// Names become part of ledger-native identifiers (`alice@domain`,
/// `alice_ewallet`), so only lowercase ASCII letters and digits are accepted.
pub fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::validation("name must not be empty"));
    }
    if name.len() > 32 {
        return Err(DomainError::validation("name must be at most 32 characters"));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "name '{name}' must contain only lowercase letters and digits"
        )));
    }
    Ok(())
}

/// Receiving address material for UTXO ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoAddress {
    /// Confidential (blinded) address.
    pub ct_address: String,
    pub confidential_key: String,
    pub non_ct_address: String,
    pub private_key: String,
}

/// Opaque per-ledger credentials returned when an account is provisioned.
///
/// Empty when the account pre-existed on the ledger and its keys are not
/// known to this system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<UtxoAddress>,
}

impl Credentials {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.public_key.is_none() && self.private_key.is_none() && self.address.is_none()
    }

    /// Serialized form stored in the `Credentials` text column.
    pub fn to_text(&self) -> Result<String, DomainError> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::invariant(format!("credentials serialization failed: {e}")))
    }

    pub fn from_text(text: &str) -> Result<Self, DomainError> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        serde_json::from_str(text)
            .map_err(|e| DomainError::validation(format!("malformed credentials: {e}")))
    }
}

/// One (GlobalId, LedgerId) → local account mapping. At most one per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBinding {
    pub global_id: GlobalId,
    pub ledger_id: LedgerId,
    pub local_account_id: LocalAccountId,
    pub credentials: Credentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_restricted_to_ledger_safe_characters() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("bob2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Alice").is_err());
        assert!(validate_name("al ice").is_err());
        assert!(validate_name("a@b").is_err());
    }

    #[test]
    fn blank_credentials_text_is_empty() {
        assert!(Credentials::from_text("").unwrap().is_empty());
        assert!(Credentials::from_text("not json").is_err());
    }

    #[test]
    fn credentials_omit_absent_fields() {
        let creds = Credentials {
            public_key: Some("ab".into()),
            ..Credentials::default()
        };
        assert_eq!(creds.to_text().unwrap(), r#"{"public_key":"ab"}"#);
    }
}
