//! Strongly-typed identifiers used across the platform.
//!
//! Platform-wide identifiers (`GlobalId`, `GlobalTxId`, `LedgerId`) are small
//! integers allocated by the bookkeeping store. Ledger-local identifiers are
//! opaque strings assigned by the external ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Platform-wide identifier of one user identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(u64);

/// Platform-wide, monotonically increasing transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(u64);

/// Identifier of a supported ledger backend (master data).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(u64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            /// Next identifier in sequence (`max + 1` allocation).
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }

            /// SQLite stores integers as signed 64-bit values.
            pub fn to_db(self) -> i64 {
                self.0 as i64
            }

            pub fn from_db(value: i64) -> Result<Self, DomainError> {
                u64::try_from(value)
                    .map(Self)
                    .map_err(|_| DomainError::invalid_id(format!("{}: negative value {}", $name, value)))
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $t {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>()
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))
            }
        }
    };
}

impl_int_newtype!(GlobalId, "GlobalId");
impl_int_newtype!(GlobalTxId, "GlobalTxId");
impl_int_newtype!(LedgerId, "LedgerId");

/// Account identifier local to one ledger (e.g. `alice@test`, `alice_ewallet`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalAccountId(String);

/// Transaction identifier assigned by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalTxId(String);

macro_rules! impl_str_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty")));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_str_newtype!(LocalAccountId, "LocalAccountId");
impl_str_newtype!(LocalTxId, "LocalTxId");

/// Correlation id of one coordinator request (log/trace correlation only).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ids_start_after_zero() {
        assert_eq!(GlobalId::new(0).next(), GlobalId::new(1));
        assert_eq!(GlobalTxId::new(41).next().get(), 42);
    }

    #[test]
    fn negative_db_values_are_rejected() {
        assert!(GlobalId::from_db(-1).is_err());
        assert_eq!(LedgerId::from_db(2).unwrap(), LedgerId::new(2));
    }

    #[test]
    fn empty_local_ids_are_rejected() {
        assert!(LocalAccountId::new("  ").is_err());
        assert!(LocalTxId::new("").is_err());
        assert_eq!(LocalAccountId::new("alice@test").unwrap().as_str(), "alice@test");
    }
}
