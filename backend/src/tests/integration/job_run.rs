// End-to-end runs of the recurring payment job against the in-memory store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use rebill_shared::{SubscriptionStatus, TransactionStatus};

use crate::gateway::{ChargeRequest, GatewayClient, GatewayError, GatewayResponse};
use crate::jobs::{RecurringPaymentJob, RunError};
use crate::tests::fixtures::{date, processor_config, subscription, test_now, transaction_for};
use crate::tests::helpers::{
    approved, declined, fixed_clock, init_test_logging, InterleavingStore, RecordingNotifier,
    StaticFactory, TestHarness,
};
use crate::tests::memory_store::MemoryStore;

fn with_processor(harness: &TestHarness) {
    harness.store.add_processor(processor_config(1, 1));
}

#[tokio::test]
async fn test_no_processors_produces_empty_run_without_writes() {
    init_test_logging();
    let harness = TestHarness::new();
    harness
        .store
        .add_subscription(subscription(10, 1, SubscriptionStatus::Pending));

    let log = harness.job().run(None).await.unwrap();

    assert_eq!(
        log,
        vec![
            "Processing 0 pending contributions".to_string(),
            "Processing 0 scheduled contributions".to_string(),
        ]
    );
    assert_eq!(harness.store.writes(), 0);
    assert_eq!(harness.store.state().lease_acquisitions, 0);
    assert!(harness.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_pending_subscription_successful_charge() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let sub = subscription(10, 1, SubscriptionStatus::Pending);
    let tx = transaction_for(500, &sub, TransactionStatus::Pending);
    harness.store.add_subscription(sub);
    harness.store.add_transaction(tx.clone());

    let log = harness.job().run(None).await.unwrap();

    assert_eq!(
        log,
        vec![
            "Processing 1 pending contributions".to_string(),
            "Processing payment for Pending contribution ID: 500".to_string(),
            "Successfully processed payment for Pending contribution ID: 500".to_string(),
            "Marking contribution as complete".to_string(),
            "Updating recurring contribution".to_string(),
            "Finished processing contribution ID: 500".to_string(),
            "Processing 0 scheduled contributions".to_string(),
        ]
    );

    let stored = harness.store.transaction(500);
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.trxn_id, Some(format!("T-{}", tx.invoice_id)));

    let sub = harness.store.subscription(10);
    assert_eq!(sub.status, SubscriptionStatus::InProgress);
    assert_eq!(sub.next_sched_date, Some(date(2024, 6, 15)));
    assert_eq!(*harness.notifier.sent.lock().unwrap(), vec![500]);
}

#[tokio::test]
async fn test_declined_charge_logs_gateway_response() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let sub = subscription(10, 1, SubscriptionStatus::Pending);
    harness.gateway.respond(&sub.processor_token, declined("05,Do Not Honour"));
    let token = sub.processor_token.clone();
    harness
        .store
        .add_transaction(transaction_for(500, &sub, TransactionStatus::Pending));
    harness.store.add_subscription(sub);

    let log = harness.job().run(None).await.unwrap();

    assert_eq!(
        &log[1..8],
        &[
            "Processing payment for Pending contribution ID: 500".to_string(),
            "ERROR: failed to process payment for Pending contribution ID: 500".to_string(),
            format!("eWAY managed customer: {}", token),
            "eWAY response: 05,Do Not Honour".to_string(),
            "Marking contribution as failed".to_string(),
            "Updating recurring contribution".to_string(),
            "Finished processing contribution ID: 500".to_string(),
        ]
    );
    assert_eq!(harness.store.transaction(500).status, TransactionStatus::Failed);
    assert_eq!(harness.store.subscription(10).failure_count, 1);
    assert_eq!(
        harness.store.subscription(10).next_sched_date,
        Some(date(2024, 6, 15))
    );
}

#[tokio::test]
async fn test_scheduled_renewal_creates_and_charges_new_transaction() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let sub = subscription(20, 1, SubscriptionStatus::InProgress);
    let first = transaction_for(300, &sub, TransactionStatus::Completed);
    harness.store.add_transaction(first.clone());
    harness.store.add_subscription(sub);

    let log = harness.job().run(None).await.unwrap();

    let transactions = harness.store.transactions_of(20);
    assert_eq!(transactions.len(), 2);
    let renewal = transactions.iter().find(|t| t.id != 300).unwrap();

    assert_eq!(renewal.status, TransactionStatus::Completed);
    assert_eq!(renewal.source, first.source);
    assert!(log.contains(&"Processing 1 scheduled contributions".to_string()));
    assert!(log.contains(&format!(
        "Successfully processed payment for Scheduled contribution ID: {}",
        renewal.id
    )));

    let requests = harness.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].invoice_reference, renewal.invoice_id);
    assert_eq!(requests[0].amount_minor_units, 1234);
}

#[tokio::test]
async fn test_pending_batch_runs_before_scheduled_batch() {
    let harness = TestHarness::new();
    with_processor(&harness);

    let scheduled = subscription(5, 1, SubscriptionStatus::InProgress);
    harness.store.add_subscription(scheduled);
    for id in [12, 11] {
        let sub = subscription(id, 1, SubscriptionStatus::Pending);
        harness
            .store
            .add_transaction(transaction_for(id * 10, &sub, TransactionStatus::Pending));
        harness.store.add_subscription(sub);
    }

    let log = harness.job().run(None).await.unwrap();

    let processing: Vec<&String> = log
        .iter()
        .filter(|line| line.starts_with("Processing payment for"))
        .collect();
    assert_eq!(processing.len(), 3);
    assert_eq!(processing[0], "Processing payment for Pending contribution ID: 110");
    assert_eq!(processing[1], "Processing payment for Pending contribution ID: 120");
    assert!(processing[2].starts_with("Processing payment for Scheduled contribution ID:"));

    let pending_header = log.iter().position(|l| l == "Processing 2 pending contributions");
    let scheduled_header = log.iter().position(|l| l == "Processing 1 scheduled contributions");
    assert!(pending_header < scheduled_header);
}

#[tokio::test]
async fn test_completed_installments_close_the_schedule() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let mut sub = subscription(20, 1, SubscriptionStatus::InProgress);
    sub.installments = Some(3);
    for id in [301, 302] {
        harness
            .store
            .add_transaction(transaction_for(id, &sub, TransactionStatus::Completed));
    }
    harness.store.add_subscription(sub);

    let log = harness.job().run(None).await.unwrap();

    assert!(log.contains(&"Recurring contribution ID: 20 has completed all installments".to_string()));
    let sub = harness.store.subscription(20);
    assert_eq!(sub.status, SubscriptionStatus::Completed);
    assert!(sub.next_sched_date.is_none());
    assert_eq!(sub.end_date, Some(date(2024, 5, 15)));
}

#[tokio::test]
async fn test_persistence_failure_is_isolated_to_one_attempt() {
    let harness = TestHarness::new();
    with_processor(&harness);
    for id in [10, 11] {
        let sub = subscription(id, 1, SubscriptionStatus::Pending);
        harness
            .store
            .add_transaction(transaction_for(id * 10, &sub, TransactionStatus::Pending));
        harness.store.add_subscription(sub);
    }
    harness.store.state().fail_transaction_saves.insert(100);

    let log = harness.job().run(None).await.unwrap();

    assert!(log
        .iter()
        .any(|l| l.starts_with("ERROR: failed to update records for contribution ID: 100:")));
    assert!(log.contains(&"Finished processing contribution ID: 100".to_string()));
    assert!(log.contains(&"Finished processing contribution ID: 110".to_string()));
    assert_eq!(harness.store.transaction(110).status, TransactionStatus::Completed);
    assert_eq!(harness.store.subscription(11).status, SubscriptionStatus::InProgress);
}

#[tokio::test]
async fn test_gateway_fault_does_not_abort_batch() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let broken = subscription(10, 1, SubscriptionStatus::Pending);
    harness.gateway.fail(&broken.processor_token, "connection reset");
    harness
        .store
        .add_transaction(transaction_for(100, &broken, TransactionStatus::Pending));
    harness.store.add_subscription(broken);
    let healthy = subscription(11, 1, SubscriptionStatus::Pending);
    harness
        .store
        .add_transaction(transaction_for(110, &healthy, TransactionStatus::Pending));
    harness.store.add_subscription(healthy);

    let log = harness.job().run(None).await.unwrap();

    assert!(log.contains(&"eWAY response: Request failed: connection reset".to_string()));
    assert_eq!(harness.store.transaction(100).status, TransactionStatus::Failed);
    assert_eq!(harness.store.transaction(110).status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_leases_are_released_after_run() {
    let harness = TestHarness::new();
    with_processor(&harness);
    let sub = subscription(10, 1, SubscriptionStatus::Pending);
    harness
        .store
        .add_transaction(transaction_for(100, &sub, TransactionStatus::Pending));
    harness.store.add_subscription(sub);
    harness
        .store
        .add_subscription(subscription(20, 1, SubscriptionStatus::InProgress));

    harness.job().run(None).await.unwrap();

    let state = harness.store.state();
    assert_eq!(state.lease_acquisitions, 2);
    // once before the charge, once before the records are written
    assert_eq!(state.lease_renewals, 4);
    assert_eq!(state.lease_releases, 2);
    assert!(state.leases.is_empty());
}

#[tokio::test]
async fn test_domain_scope_limits_processors() {
    let harness = TestHarness::new();
    harness.store.add_processor(processor_config(1, 1));
    harness.store.add_processor(processor_config(2, 2));
    for (id, processor) in [(10, 1), (11, 2)] {
        let sub = subscription(id, processor, SubscriptionStatus::Pending);
        harness
            .store
            .add_transaction(transaction_for(id * 10, &sub, TransactionStatus::Pending));
        harness.store.add_subscription(sub);
    }

    let log = harness.job().run(Some(2)).await.unwrap();

    assert_eq!(log[0], "Processing 1 pending contributions");
    assert_eq!(*harness.factory.built.lock().unwrap(), vec![2]);
    assert_eq!(harness.store.transaction(100).status, TransactionStatus::Pending);
    assert_eq!(harness.store.transaction(110).status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_selection_failure_fails_the_run() {
    let harness = TestHarness::new();
    with_processor(&harness);
    harness.store.state().fail_subscription_queries = true;

    let result = harness.job().run(None).await;
    assert!(matches!(result, Err(RunError::Selection(_))));
}

#[tokio::test]
async fn test_processor_lookup_failure_fails_the_run() {
    let harness = TestHarness::new();
    harness.store.state().fail_processor_queries = true;

    let result = harness.job().run(None).await;
    assert!(matches!(result, Err(RunError::ProcessorLookup(_))));
}

#[tokio::test]
async fn test_receipt_failure_keeps_success() {
    let mut harness = TestHarness::new();
    harness.notifier = Arc::new(RecordingNotifier {
        failing: true,
        ..Default::default()
    });
    with_processor(&harness);
    let sub = subscription(10, 1, SubscriptionStatus::Pending);
    harness
        .store
        .add_transaction(transaction_for(100, &sub, TransactionStatus::Pending));
    harness.store.add_subscription(sub);

    let log = harness.job().run(None).await.unwrap();

    assert!(log.contains(&"Marking contribution as complete".to_string()));
    assert!(!log.iter().any(|l| l.starts_with("ERROR:")));
    assert_eq!(harness.store.transaction(100).status, TransactionStatus::Completed);
}

fn add_pending(harness: &TestHarness, id: i64) -> String {
    let sub = subscription(id, 1, SubscriptionStatus::Pending);
    let token = sub.processor_token.clone();
    harness
        .store
        .add_transaction(transaction_for(id * 10, &sub, TransactionStatus::Pending));
    harness.store.add_subscription(sub);
    token
}

#[tokio::test]
async fn test_run_finishing_between_due_query_and_lease_is_not_charged_again() {
    let harness = TestHarness::new();
    with_processor(&harness);
    harness
        .store
        .add_subscription(subscription(10, 1, SubscriptionStatus::InProgress));

    // another run charges and advances subscription 10 after this run has
    // read the due list but before it leases anything
    let racing = Arc::new(InterleavingStore::new(harness.store.clone()));
    let other_run = harness.job();
    racing.after_due_query(async move {
        let log = other_run.run(None).await.unwrap();
        assert!(log.contains(&"Processing 1 scheduled contributions".to_string()));
    });

    let job = RecurringPaymentJob::new(
        harness.store.clone(),
        racing.clone(),
        harness.store.clone(),
        harness.factory.clone(),
        harness.notifier.clone(),
        fixed_clock(),
        harness.config.clone(),
    );
    let log = job.run(None).await.unwrap();

    assert_eq!(
        log,
        vec![
            "Processing 0 pending contributions".to_string(),
            "Processing 0 scheduled contributions".to_string(),
        ]
    );
    assert_eq!(harness.store.transactions_of(10).len(), 1);
    assert_eq!(harness.gateway.requests().len(), 1);
    assert_eq!(harness.store.subscription(10).next_sched_date, Some(date(2024, 6, 15)));
    assert!(harness.store.state().leases.is_empty());
}

/// Approves every charge; charging `trigger_token` lets another run take over
/// the lease on `taken`, as if ours had expired.
struct TakeoverGateway {
    store: Arc<MemoryStore>,
    trigger_token: String,
    taken: i64,
    other_run: Uuid,
    charged: Mutex<Vec<String>>,
}

#[async_trait]
impl GatewayClient for TakeoverGateway {
    async fn process_payment(&self, request: &ChargeRequest) -> Result<GatewayResponse, GatewayError> {
        self.charged.lock().unwrap().push(request.customer_token.clone());
        if request.customer_token == self.trigger_token {
            self.store.state().leases.insert(
                self.taken,
                (self.other_run, test_now() + chrono::Duration::minutes(10)),
            );
        }
        Ok(approved("1010842"))
    }
}

#[tokio::test]
async fn test_lost_lease_is_not_charged() {
    let mut harness = TestHarness::new();
    with_processor(&harness);
    harness.config.charge_concurrency = 1;
    let first_token = add_pending(&harness, 11);
    add_pending(&harness, 12);

    let other_run = Uuid::new_v4();
    let gateway = Arc::new(TakeoverGateway {
        store: harness.store.clone(),
        trigger_token: first_token.clone(),
        taken: 12,
        other_run,
        charged: Mutex::new(Vec::new()),
    });
    harness.factory = Arc::new(StaticFactory::new(gateway.clone()));

    let log = harness.job().run(None).await.unwrap();

    assert!(log.contains(&"Finished processing contribution ID: 110".to_string()));
    assert!(log.contains(
        &"Skipping Pending contribution ID: 120: recurring contribution taken over by another run"
            .to_string()
    ));
    assert!(!log.contains(&"Processing payment for Pending contribution ID: 120".to_string()));
    assert_eq!(*gateway.charged.lock().unwrap(), vec![first_token]);

    assert_eq!(harness.store.transaction(120).status, TransactionStatus::Pending);
    assert_eq!(harness.store.subscription(12).status, SubscriptionStatus::Pending);
    assert_eq!(harness.store.lease_holder(12), Some(other_run));
}

/// Answers after a per-token delay and tracks how many charges overlap.
#[derive(Default)]
struct TimedGateway {
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl GatewayClient for TimedGateway {
    async fn process_payment(&self, request: &ChargeRequest) -> Result<GatewayResponse, GatewayError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&request.customer_token)
            .copied()
            .unwrap_or_default();
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(request.customer_token.clone());
        Ok(approved(&format!("T-{}", request.invoice_reference)))
    }
}

#[tokio::test]
async fn test_charges_overlap_but_records_follow_id_order() {
    let mut harness = TestHarness::new();
    with_processor(&harness);
    harness.config.charge_concurrency = 2;
    let slow = add_pending(&harness, 11);
    let fast = add_pending(&harness, 12);

    let gateway = Arc::new(TimedGateway {
        delays: HashMap::from([
            (slow.clone(), Duration::from_millis(300)),
            (fast.clone(), Duration::from_millis(20)),
        ]),
        ..TimedGateway::default()
    });
    harness.factory = Arc::new(StaticFactory::new(gateway.clone()));

    let log = harness.job().run(None).await.unwrap();

    assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(*gateway.finished.lock().unwrap(), vec![fast, slow]);

    let position = |line: &str| log.iter().position(|l| l == line).unwrap();
    assert!(
        position("Finished processing contribution ID: 110")
            < position("Processing payment for Pending contribution ID: 120")
    );
    assert_eq!(harness.store.transaction(110).status, TransactionStatus::Completed);
    assert_eq!(harness.store.transaction(120).status, TransactionStatus::Completed);
}
