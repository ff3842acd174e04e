//! End-to-end tests of the coordinator against simulated ledgers.
//!
//! Tests: CreateAccount/Mint/Transfer → LedgerAdapter → BookkeepingStore
//!
//! Verifies:
//! - Bookings mirror exactly what the ledgers committed
//! - Failures before the ledger call leave no trace anywhere
//! - Lost or slow ledger responses surface as "outcome unknown", never as
//!   a silent success or a booked guess

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mtp_core::{
        Amount, Balance, Credentials, GlobalId, Ledger, LedgerId, LocalAccountId, TransactionRecord, TxKind,
    };
    use mtp_ledgers::{
        AdapterRegistry, ElementsAdapter, ElementsSettings, IrohaAdapter, IrohaSettings, LedgerAdapter,
        SimulatedElements, SimulatedIroha,
    };

    use crate::bookkeeping::{BookkeepingStore, SqliteStore};
    use crate::config::CoordinatorConfig;
    use crate::coordinator::{Coordinator, CoordinatorError, LedgerAccountStatus, LedgerEffect};
    use crate::reconcile::InMemoryOutOfSyncLog;

    const ELEMENTS: LedgerId = LedgerId::new(1);
    const IROHA: LedgerId = LedgerId::new(2);

    struct Harness {
        coordinator: Coordinator<SqliteStore>,
        store: Arc<SqliteStore>,
        iroha: Arc<SimulatedIroha>,
        elements: Arc<SimulatedElements>,
        iroha_adapter: Arc<IrohaAdapter<SimulatedIroha>>,
        elements_adapter: Arc<ElementsAdapter<SimulatedElements>>,
    }

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    async fn setup() -> Harness {
        setup_with(SimulatedIroha::new(&IrohaSettings::default()), CoordinatorConfig::default()).await
    }

    async fn setup_with(iroha: SimulatedIroha, config: CoordinatorConfig) -> Harness {
        let iroha_settings = IrohaSettings::default();
        let elements_settings = ElementsSettings::default();
        let iroha = Arc::new(iroha);
        let elements = Arc::new(SimulatedElements::new(&elements_settings));
        let iroha_adapter = Arc::new(IrohaAdapter::new(iroha.clone(), iroha_settings));
        let elements_adapter = Arc::new(ElementsAdapter::new(elements.clone(), elements_settings));

        let mut registry = AdapterRegistry::new();
        registry
            .register(Ledger::new(ELEMENTS, "Elements"), elements_adapter.clone())
            .register(Ledger::new(IROHA, "Iroha"), iroha_adapter.clone());

        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let coordinator = Coordinator::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(InMemoryOutOfSyncLog::new()),
            config,
        )
        .await
        .unwrap();

        Harness {
            coordinator,
            store,
            iroha,
            elements,
            iroha_adapter,
            elements_adapter,
        }
    }

    async fn user(h: &Harness, name: &str) -> GlobalId {
        let created = h.coordinator.create_account_everywhere(name).await.unwrap();
        assert!(created.all_bound(), "{created:?}");
        created.global_id
    }

    #[tokio::test]
    async fn create_account_binds_every_ledger_and_is_idempotent() {
        let h = setup().await;

        let first = h.coordinator.create_account_everywhere("alice").await.unwrap();
        assert_eq!(first.global_id, GlobalId::new(1));
        assert_eq!(
            first.status(IROHA).and_then(LedgerAccountStatus::local_account_id).unwrap().as_str(),
            "alice@test"
        );
        assert_eq!(
            first.status(ELEMENTS).and_then(LedgerAccountStatus::local_account_id).unwrap().as_str(),
            "alice_ewallet"
        );

        let again = h.coordinator.create_account_everywhere("alice").await.unwrap();
        assert_eq!(again, first);

        let bob = h.coordinator.create_account("bob", &[IROHA]).await.unwrap();
        assert_eq!(bob.global_id, GlobalId::new(2));
        assert_eq!(bob.ledgers.len(), 1);
        assert_eq!(h.store.list_bindings().await.unwrap().len(), 3);

        // Keys generated for the Iroha account are kept with the binding.
        let binding = h.coordinator.identities().binding(GlobalId::new(1), IROHA).await.unwrap().unwrap();
        assert!(binding.credentials.public_key.is_some());
    }

    #[tokio::test]
    async fn unknown_ledger_rejects_before_any_side_effect() {
        let h = setup().await;

        let err = h
            .coordinator
            .create_account("carol", &[IROHA, LedgerId::new(9)])
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::UnknownLedger(LedgerId::new(9)));
        assert!(h.store.find_identity_by_name("carol").await.unwrap().is_none());
        assert!(h.iroha_adapter.query_balance(&LocalAccountId::new("carol@test").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_ledger_leaves_account_pending_until_retried() {
        let h = setup().await;
        h.iroha.set_offline(true);

        let partial = h.coordinator.create_account_everywhere("alice").await.unwrap();
        assert!(partial.status(ELEMENTS).unwrap().is_bound());
        assert!(matches!(partial.status(IROHA), Some(LedgerAccountStatus::Pending(_))));
        assert_eq!(partial.pending(), vec![IROHA]);

        h.iroha.set_offline(false);
        let retried = h.coordinator.create_account_everywhere("alice").await.unwrap();
        assert_eq!(retried.global_id, partial.global_id);
        assert!(retried.all_bound());
    }

    #[tokio::test]
    async fn existing_ledger_account_is_adopted() {
        let h = setup().await;
        // Provisioned on the ledger earlier, but never bound.
        h.elements_adapter.create_account("dave").await.unwrap();

        let created = h.coordinator.create_account("dave", &[ELEMENTS]).await.unwrap();
        assert_eq!(
            created.status(ELEMENTS),
            Some(&LedgerAccountStatus::Bound(LocalAccountId::new("dave_ewallet").unwrap()))
        );
    }

    #[tokio::test]
    async fn local_account_owned_by_another_identity_is_a_conflict() {
        let h = setup().await;
        let mallory = h.coordinator.identities().ensure_identity("mallory").await.unwrap();
        h.coordinator
            .identities()
            .bind_ledger_account(
                mallory,
                IROHA,
                LocalAccountId::new("carol@test").unwrap(),
                Credentials::empty(),
            )
            .await
            .unwrap();

        let carol = h.coordinator.create_account("carol", &[IROHA]).await.unwrap();
        assert!(matches!(carol.status(IROHA), Some(LedgerAccountStatus::Conflict(_))));
        let owner = h
            .coordinator
            .identities()
            .resolve_global_id(IROHA, &LocalAccountId::new("carol@test").unwrap())
            .await
            .unwrap();
        assert_eq!(owner, Some(mallory));
    }

    #[tokio::test]
    async fn mint_and_transfer_book_what_the_ledger_committed() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        let bob = user(&h, "bob").await;

        let minted = h.coordinator.mint(IROHA, alice, amount("50")).await.unwrap();
        assert_eq!(minted.global_tx_id.get(), 1);
        assert!(!minted.already_booked);
        assert_eq!(h.coordinator.balance(alice, IROHA).await.unwrap(), amount("50"));

        h.coordinator.mint(IROHA, bob, amount("15")).await.unwrap();
        assert_eq!(h.coordinator.balance(bob, IROHA).await.unwrap(), amount("15"));

        let moved = h
            .coordinator
            .transfer(IROHA, alice, bob, amount("5.5"), "rent")
            .await
            .unwrap();
        assert_eq!(moved.global_tx_id.get(), 3);

        assert_eq!(h.coordinator.balance(alice, IROHA).await.unwrap(), amount("44.5"));
        assert_eq!(h.coordinator.balance(bob, IROHA).await.unwrap(), amount("20.5"));

        let txs = h.store.list_transactions().await.unwrap();
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].kind, TxKind::Mint);
        assert_eq!(txs[0].origin, None);
        assert_eq!(txs[0].amount, amount("50"));
        assert_eq!(txs[2].kind, TxKind::Transfer);
        assert_eq!(txs[2].origin.as_ref().unwrap().as_str(), "alice@test");
        assert_eq!(txs[2].dest.as_str(), "bob@test");
        assert_eq!(txs[2].local_tx_id, moved.local_tx_id);

        let on_ledger = h
            .iroha_adapter
            .query_balance(&LocalAccountId::new("alice@test").unwrap())
            .await
            .unwrap();
        assert_eq!(on_ledger, amount("44.5"));

        let report = h.coordinator.reporter().report().await.unwrap();
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test]
    async fn elements_mint_reissues_and_books_in_two_decimals() {
        let h = setup().await;
        let alice = user(&h, "alice").await;

        h.coordinator.mint(ELEMENTS, alice, amount("12.34")).await.unwrap();
        assert!(h.elements.reissue_count() >= 1);
        assert_eq!(h.coordinator.balance(alice, ELEMENTS).await.unwrap(), amount("12.34"));
        // Other ledgers are untouched.
        assert_eq!(h.coordinator.balance(alice, IROHA).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn requests_that_fail_before_the_ledger_call_leave_no_trace() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        let bob = h.coordinator.create_account("bob", &[IROHA]).await.unwrap().global_id;
        h.coordinator.mint(IROHA, alice, amount("10")).await.unwrap();
        let committed = h.iroha.tx_count_committed();

        let err = h.coordinator.mint(ELEMENTS, bob, amount("1")).await.unwrap_err();
        assert_eq!(err, CoordinatorError::UnboundAccount { global_id: bob, ledger_id: ELEMENTS });

        let err = h.coordinator.transfer(IROHA, alice, bob, amount("10.01"), "").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InsufficientFunds { .. }));

        let err = h.coordinator.transfer(IROHA, alice, alice, amount("1"), "").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let err = h.coordinator.mint(IROHA, alice, Amount::ZERO).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let err = h.coordinator.mint(LedgerId::new(7), alice, amount("1")).await.unwrap_err();
        assert_eq!(err, CoordinatorError::UnknownLedger(LedgerId::new(7)));

        assert_eq!(h.iroha.tx_count_committed(), committed);
        assert_eq!(h.store.list_transactions().await.unwrap().len(), 1);
        assert_eq!(h.elements.reissue_count(), 0);
    }

    async fn books(h: &Harness) -> (Vec<TransactionRecord>, Vec<Balance>) {
        (
            h.store.list_transactions().await.unwrap(),
            h.store.list_balances().await.unwrap(),
        )
    }

    #[tokio::test]
    async fn ledger_rejection_is_definite_and_books_nothing() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        h.coordinator.mint(IROHA, alice, amount("1")).await.unwrap();
        let before = books(&h).await;

        h.iroha.fail_next_tx();
        let err = h.coordinator.mint(IROHA, alice, amount("2")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AdapterAborted { .. }));
        assert_eq!(err.ledger_effect(), LedgerEffect::None);
        assert_eq!(books(&h).await, before);
    }

    #[tokio::test]
    async fn ledger_side_insufficient_funds_leaves_books_untouched() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        let bob = user(&h, "bob").await;
        h.coordinator.mint(IROHA, alice, amount("10")).await.unwrap();

        // Moved on the ledger behind the coordinator's back: booked 10, held 2.
        let alice_local = LocalAccountId::new("alice@test").unwrap();
        let bob_local = LocalAccountId::new("bob@test").unwrap();
        h.iroha_adapter
            .transfer(&alice_local, &bob_local, amount("8"), "out of band")
            .await
            .unwrap();
        let before = books(&h).await;

        let err = h
            .coordinator
            .transfer(IROHA, alice, bob, amount("5"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InsufficientFunds { .. }), "{err:?}");
        assert_eq!(err.ledger_effect(), LedgerEffect::None);
        assert_eq!(books(&h).await, before);
        assert_eq!(h.iroha_adapter.query_balance(&alice_local).await.unwrap(), amount("2"));
    }

    #[tokio::test]
    async fn lost_response_is_recovered_from_tx_status() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        h.coordinator.mint(IROHA, alice, amount("1")).await.unwrap();

        h.iroha.drop_next_response();
        let minted = h.coordinator.mint(IROHA, alice, amount("2")).await.unwrap();
        assert_eq!(minted.global_tx_id.get(), 2);
        assert_eq!(h.coordinator.balance(alice, IROHA).await.unwrap(), amount("3"));
    }

    #[tokio::test]
    async fn unknown_outcome_is_reported_and_shows_up_as_divergence() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        h.coordinator.mint(IROHA, alice, amount("1")).await.unwrap();

        h.iroha.disconnect_after_next_commit();
        let err = h.coordinator.mint(IROHA, alice, amount("4")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::LedgerOutcomeUnknown { .. }), "{err:?}");
        assert_eq!(err.ledger_effect(), LedgerEffect::Indeterminate);
        assert!(!err.is_retryable());
        assert_eq!(h.coordinator.balance(alice, IROHA).await.unwrap(), amount("1"));

        h.iroha.set_offline(false);
        let audit = h.coordinator.reporter().ledger_divergence().await.unwrap();
        assert_eq!(audit.divergences.len(), 1);
        assert_eq!(audit.divergences[0].booked, amount("1"));
        assert_eq!(audit.divergences[0].on_ledger, amount("5"));
    }

    #[tokio::test]
    async fn slow_ledger_times_out_as_indeterminate() {
        let config = CoordinatorConfig { adapter_timeout_ms: 20 };
        let slow = SimulatedIroha::new(&IrohaSettings::default()).with_latency(Duration::from_millis(250));
        let h = setup_with(slow, config).await;

        let created = h.coordinator.create_account("alice", &[IROHA]).await.unwrap();
        assert!(matches!(created.status(IROHA), Some(LedgerAccountStatus::Pending(_))));

        let alice = created.global_id;
        h.coordinator
            .identities()
            .bind_ledger_account(alice, IROHA, LocalAccountId::new("alice@test").unwrap(), Credentials::empty())
            .await
            .unwrap();

        let err = h.coordinator.mint(IROHA, alice, amount("1")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::LedgerOutcomeUnknown { .. }), "{err:?}");
        assert!(h.store.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_transfers_get_unique_ids_and_consistent_balances() {
        let h = setup().await;
        let alice = user(&h, "alice").await;
        let bob = user(&h, "bob").await;
        h.coordinator.mint(IROHA, alice, amount("100")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let coordinator = h.coordinator.clone();
            let (from, to) = if i % 3 == 0 { (bob, alice) } else { (alice, bob) };
            handles.push(tokio::spawn(async move {
                coordinator.transfer(IROHA, from, to, amount("1"), "").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            // Bob may not hold funds yet when his transfers run.
            if let Ok(booked) = handle.await.unwrap() {
                ids.push(booked.global_tx_id.get());
            }
        }
        ids.sort_unstable();
        ids.dedup();
        let booked = h.store.list_transactions().await.unwrap();
        assert_eq!(ids.len() + 1, booked.len());

        let total = h.coordinator.balance(alice, IROHA).await.unwrap().minor()
            + h.coordinator.balance(bob, IROHA).await.unwrap().minor();
        assert_eq!(total, amount("100").minor());

        let audit = h.coordinator.reporter().verify_balances().await.unwrap();
        assert!(audit.is_clean(), "{audit:?}");
        let ledgers = h.coordinator.reporter().ledger_divergence().await.unwrap();
        assert!(ledgers.divergences.is_empty(), "{ledgers:?}");
    }
}
