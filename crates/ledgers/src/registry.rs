//! Adapter lookup by ledger id or ledger name.

use std::collections::BTreeMap;
use std::sync::Arc;

use mtp_core::{Ledger, LedgerId};

use crate::adapter::{AssetRef, LedgerAdapter};

/// One registered ledger backend.
#[derive(Clone)]
pub struct RegisteredLedger {
    pub ledger: Ledger,
    pub adapter: Arc<dyn LedgerAdapter>,
    pub asset: AssetRef,
}

impl core::fmt::Debug for RegisteredLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisteredLedger")
            .field("ledger", &self.ledger)
            .field("kind", &self.adapter.kind())
            .field("asset", &self.asset)
            .finish()
    }
}

/// Polymorphic dispatch table: one adapter per supported ledger.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    ledgers: BTreeMap<LedgerId, RegisteredLedger>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for `ledger`, minting its default asset.
    ///
    /// A later registration for the same id replaces the earlier one.
    pub fn register(&mut self, ledger: Ledger, adapter: Arc<dyn LedgerAdapter>) -> &mut Self {
        let asset = adapter.default_asset();
        self.register_with_asset(ledger, adapter, asset)
    }

    pub fn register_with_asset(
        &mut self,
        ledger: Ledger,
        adapter: Arc<dyn LedgerAdapter>,
        asset: AssetRef,
    ) -> &mut Self {
        self.ledgers.insert(
            ledger.ledger_id,
            RegisteredLedger {
                ledger,
                adapter,
                asset,
            },
        );
        self
    }

    pub fn get(&self, ledger_id: LedgerId) -> Option<&RegisteredLedger> {
        self.ledgers.get(&ledger_id)
    }

    /// Case-insensitive lookup by ledger name (`"Iroha"`, `"elements"`).
    pub fn by_name(&self, name: &str) -> Option<&RegisteredLedger> {
        self.ledgers
            .values()
            .find(|r| r.ledger.name.eq_ignore_ascii_case(name))
    }

    pub fn ledger_ids(&self) -> Vec<LedgerId> {
        self.ledgers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredLedger> {
        self.ledgers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iroha::{IrohaAdapter, IrohaSettings, SimulatedIroha};

    #[test]
    fn lookup_by_id_and_name() {
        let settings = IrohaSettings::default();
        let node = Arc::new(SimulatedIroha::new(&settings));
        let adapter = Arc::new(IrohaAdapter::new(node, settings));

        let mut registry = AdapterRegistry::new();
        registry.register(Ledger::new(LedgerId::new(2), "Iroha"), adapter);

        assert!(registry.get(LedgerId::new(2)).is_some());
        assert!(registry.get(LedgerId::new(1)).is_none());
        let found = registry.by_name("iroha").unwrap();
        assert_eq!(found.ledger.ledger_id, LedgerId::new(2));
        assert_eq!(found.asset.as_str(), "coin#test");
        assert_eq!(registry.ledger_ids(), vec![LedgerId::new(2)]);
    }
}
