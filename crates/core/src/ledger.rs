//! Ledger master data.

use serde::{Deserialize, Serialize};

use crate::id::LedgerId;

/// A supported ledger backend, seeded once into the `Ledgers` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ledger {
    pub ledger_id: LedgerId,
    pub name: String,
}

impl Ledger {
    pub fn new(ledger_id: LedgerId, name: impl Into<String>) -> Self {
        Self {
            ledger_id,
            name: name.into(),
        }
    }
}

/// Master data seeded when no other set is configured.
pub fn default_ledgers() -> Vec<Ledger> {
    vec![
        Ledger::new(LedgerId::new(1), "Elements"),
        Ledger::new(LedgerId::new(2), "Iroha"),
    ]
}
