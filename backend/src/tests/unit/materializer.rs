// Unit tests for creating renewal transactions

use std::collections::HashSet;
use std::sync::Arc;

use rebill_shared::{SubscriptionStatus, TransactionStatus};

use crate::billing::TransactionMaterializer;
use crate::stores::StoreError;
use crate::tests::fixtures::{amount, subscription, test_now, transaction_for};
use crate::tests::helpers::fixed_clock;
use crate::tests::memory_store::MemoryStore;

fn materializer(store: &Arc<MemoryStore>) -> TransactionMaterializer {
    TransactionMaterializer::new(store.clone(), fixed_clock())
}

#[tokio::test]
async fn test_copies_channel_fields_from_earliest_transaction() {
    let store = Arc::new(MemoryStore::new());
    let mut sub = subscription(7, 1, SubscriptionStatus::InProgress);
    sub.amount = amount("25.00");

    let first = transaction_for(100, &sub, TransactionStatus::Completed);
    let mut later = transaction_for(101, &sub, TransactionStatus::Failed);
    later.source = Some("Retry from admin".to_string());
    later.address_id = Some(99_999);
    store.add_transaction(first.clone());
    store.add_transaction(later);
    store.add_subscription(sub.clone());

    let created = materializer(&store).materialize(&sub).await.unwrap();

    assert_eq!(created.subscription_id, 7);
    assert_eq!(created.contact_id, sub.contact_id);
    assert_eq!(created.status, TransactionStatus::Pending);
    assert_eq!(created.total_amount, amount("25.00"));
    assert_eq!(created.net_amount, amount("25.00"));
    assert_eq!(created.currency, "AUD");
    assert_eq!(created.financial_type_id, sub.financial_type_id);
    assert_eq!(created.receive_date, test_now());
    assert!(created.trxn_id.is_none());

    assert_eq!(created.source, first.source);
    assert_eq!(created.address_id, first.address_id);
    assert_eq!(created.contribution_page_id, first.contribution_page_id);
    assert_eq!(created.payment_instrument_id, first.payment_instrument_id);

    assert_eq!(store.transactions_of(7).len(), 3);
}

#[tokio::test]
async fn test_no_history_leaves_channel_fields_empty() {
    let store = Arc::new(MemoryStore::new());
    let sub = subscription(8, 1, SubscriptionStatus::InProgress);
    store.add_subscription(sub.clone());

    let created = materializer(&store).materialize(&sub).await.unwrap();

    assert!(created.source.is_none());
    assert!(created.address_id.is_none());
    assert!(created.contribution_page_id.is_none());
    assert!(created.payment_instrument_id.is_none());
    assert_eq!(created.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_repeated_materialization_never_reuses_invoice_reference() {
    let store = Arc::new(MemoryStore::new());
    let sub = subscription(9, 1, SubscriptionStatus::InProgress);
    store.add_subscription(sub.clone());

    let materializer = materializer(&store);
    let a = materializer.materialize(&sub).await.unwrap();
    let b = materializer.materialize(&sub).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.invoice_id, b.invoice_id);
    let invoices: HashSet<String> = store
        .transactions_of(9)
        .into_iter()
        .map(|t| t.invoice_id)
        .collect();
    assert_eq!(invoices.len(), 2);
}

#[tokio::test]
async fn test_invoice_collision_is_retried_with_a_new_reference() {
    let store = Arc::new(MemoryStore::new());
    let sub = subscription(9, 1, SubscriptionStatus::InProgress);
    store.add_subscription(sub.clone());
    store.state().conflicting_inserts = 1;

    let created = materializer(&store).materialize(&sub).await.unwrap();
    let stored = store.transactions_of(9);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, created.id);
    assert_eq!(store.state().conflicting_inserts, 0);
}

#[tokio::test]
async fn test_persistent_collisions_give_up() {
    let store = Arc::new(MemoryStore::new());
    let sub = subscription(9, 1, SubscriptionStatus::InProgress);
    store.add_subscription(sub.clone());
    store.state().conflicting_inserts = 10;

    let err = materializer(&store).materialize(&sub).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(store.transactions_of(9).is_empty());
}
