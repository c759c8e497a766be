//! Integration tests for the five reconciliation jobs.

mod common;

use chrono::Utc;
use common::{BUYER, Harness, SELLER};

use escrowd::clients::WalletCall;
use escrowd::config::SchedulerConfig;
use escrowd::models::{EpochSeconds, Party, PartyRole, Recipient, Transaction, TransactionKind};
use escrowd::scheduler::{DISBURSEMENT_COMPLETE, DISBURSEMENT_PROCESSING, Job};
use escrowd::status::TransactionStatus;
use escrowd::store::TransactionStore;
use rust_decimal_macros::dec;

fn past() -> EpochSeconds {
    EpochSeconds::from_secs(Utc::now().timestamp() - 3600)
}

fn future() -> EpochSeconds {
    EpochSeconds::from_secs(Utc::now().timestamp() + 3600)
}

fn base_tx(tx_id: &str, status: TransactionStatus) -> Transaction {
    let mut tx = Transaction::new(
        tx_id,
        format!("{tx_id}-ms"),
        format!("{tx_id}-p"),
        "biz-1",
        "Website build",
        TransactionKind::OneOff,
        dec!(500),
        "NGN",
    );
    tx.status = status;
    tx
}

#[tokio::test]
async fn inspection_job_satisfies_paid_delivered_transactions() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::Delivered);
    tx.inspection_period = past();
    h.seed_prepared(&tx).await;
    h.payments
        .set_payment(&tx.transaction_id, true, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::InspectionPeriod).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(
        h.status_of(&tx).await,
        TransactionStatus::ClosedDisbursementPending
    );
    assert_eq!(
        h.audit_statuses(&tx).await,
        vec![
            TransactionStatus::DeliveredAccepted,
            TransactionStatus::ClosedDisbursementPending
        ]
    );
}

#[tokio::test]
async fn inspection_job_skips_unpaid_and_unexpired() {
    let h = Harness::new();

    let mut unpaid = base_tx("tx-unpaid", TransactionStatus::Delivered);
    unpaid.inspection_period = past();
    h.seed_prepared(&unpaid).await;

    let mut unexpired = base_tx("tx-early", TransactionStatus::Delivered);
    unexpired.inspection_period = future();
    h.seed_prepared(&unexpired).await;
    h.payments
        .set_payment(&unexpired.transaction_id, true, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::InspectionPeriod).await.unwrap();

    assert_eq!(processed, 0);
    assert_eq!(h.status_of(&unpaid).await, TransactionStatus::Delivered);
    assert_eq!(h.status_of(&unexpired).await, TransactionStatus::Delivered);
}

#[tokio::test]
async fn auto_mark_delivers_only_for_enabled_businesses() {
    let h = Harness::new();
    h.business.set_profile("biz-auto", true).await;
    h.business.set_profile("biz-manual", false).await;

    let mut auto = base_tx("tx-auto", TransactionStatus::AcceptedFunded);
    auto.business_id = "biz-auto".to_string();
    auto.due_date = past();
    h.seed_prepared(&auto).await;

    let mut manual = base_tx("tx-manual", TransactionStatus::AcceptedFunded);
    manual.business_id = "biz-manual".to_string();
    manual.due_date = past();
    h.seed_prepared(&manual).await;

    let mut not_due = base_tx("tx-later", TransactionStatus::AcceptedFunded);
    not_due.business_id = "biz-auto".to_string();
    not_due.due_date = future();
    h.seed_prepared(&not_due).await;

    let processed = h.scheduler().tick(Job::AutoMarkDelivered).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&auto).await, TransactionStatus::Delivered);
    assert_eq!(h.status_of(&manual).await, TransactionStatus::AcceptedFunded);
    assert_eq!(h.status_of(&not_due).await, TransactionStatus::AcceptedFunded);
}

#[tokio::test]
async fn auto_mark_treats_missing_profile_as_disabled() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::AcceptedFunded);
    tx.business_id = "biz-unknown".to_string();
    tx.due_date = past();
    h.seed_prepared(&tx).await;

    let processed = h.scheduler().tick(Job::AutoMarkDelivered).await.unwrap();

    assert_eq!(processed, 0);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::AcceptedFunded);
}

#[tokio::test]
async fn auto_close_moves_disbursement_complete_to_closed() {
    let h = Harness::new();
    let tx = base_tx("tx-1", TransactionStatus::ClosedDisbursementComplete);
    h.seed_prepared(&tx).await;

    let processed = h.scheduler().tick(Job::AutoClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::Closed);
    assert_eq!(h.audit_statuses(&tx).await, vec![TransactionStatus::Closed]);
}

#[tokio::test]
async fn close_rule_unaccepted_party_closes_without_refund() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::AcceptedFunded);
    tx.due_date = past();
    h.store.create_transaction(&tx).await.unwrap();
    h.store
        .upsert_party(&Party::new(&tx.parties_id, BUYER, PartyRole::Buyer).accepted())
        .await
        .unwrap();
    // Seller invitation still pending
    h.store
        .upsert_party(&Party::new(&tx.parties_id, SELLER, PartyRole::Seller))
        .await
        .unwrap();
    h.payments
        .set_payment(&tx.transaction_id, true, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::TransactionClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::Closed);
    // Rule 1 fires first: no refund despite the paid payment record
    assert!(h.wallet.calls().await.is_empty());
}

#[tokio::test]
async fn close_rule_paid_transaction_refunds_and_closes_refunded() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::AcceptedFunded);
    tx.due_date = past();
    h.seed_prepared(&tx).await;
    h.payments
        .set_payment(&tx.transaction_id, true, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::TransactionClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::ClosedRefunded);
    assert_eq!(h.wallet.debits().await.len(), 1);
    assert_eq!(h.wallet.credits().await.len(), 1);
}

#[tokio::test]
async fn close_rule_unpaid_payment_record_closes_not_funded() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::AcceptedNotFunded);
    tx.due_date = past();
    h.seed_prepared(&tx).await;
    h.payments
        .set_payment(&tx.transaction_id, false, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::TransactionClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::ClosedNotFunded);
    assert!(h.wallet.calls().await.is_empty());
}

#[tokio::test]
async fn close_rule_delivered_without_payment_record_refunds() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::Delivered);
    tx.due_date = past();
    h.seed_prepared(&tx).await;

    let processed = h.scheduler().tick(Job::TransactionClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::ClosedRefunded);
    assert_eq!(h.wallet.debits().await.len(), 1);
}

#[tokio::test]
async fn close_rule_draft_without_payment_record_closes_plain() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::Draft);
    tx.due_date = past();
    h.seed_prepared(&tx).await;

    let processed = h.scheduler().tick(Job::TransactionClose).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.status_of(&tx).await, TransactionStatus::Closed);
    assert!(h.wallet.calls().await.is_empty());
}

#[tokio::test]
async fn transaction_close_works_in_batches_of_twenty() {
    let h = Harness::new();
    for i in 0..25 {
        let mut tx = base_tx(&format!("tx-{i:02}"), TransactionStatus::Draft);
        tx.due_date = past();
        h.seed_prepared(&tx).await;
    }

    let scheduler = h.scheduler();
    assert_eq!(scheduler.tick(Job::TransactionClose).await.unwrap(), 20);
    assert_eq!(scheduler.tick(Job::TransactionClose).await.unwrap(), 5);
    assert_eq!(scheduler.tick(Job::TransactionClose).await.unwrap(), 0);
}

#[tokio::test]
async fn update_status_with_failing_payment_lookup_defers_the_row() {
    let h = Harness::new();
    let tx = base_tx("tx-1", TransactionStatus::ClosedDisbursementPending);
    h.seed_prepared(&tx).await;
    h.payments.fail_lookups(true);

    let processed = h.scheduler().tick(Job::UpdateStatus).await.unwrap();

    assert_eq!(processed, 0);
    // The processing entry is written, nothing else happens
    assert_eq!(
        h.activity_texts(&tx).await,
        vec![DISBURSEMENT_PROCESSING.to_string()]
    );
    assert_eq!(
        h.status_of(&tx).await,
        TransactionStatus::ClosedDisbursementPending
    );
    assert!(h.wallet.calls().await.is_empty());
}

#[tokio::test]
async fn update_status_disburses_and_completes() {
    let h = Harness::new();
    let mut tx = base_tx("tx-1", TransactionStatus::ClosedDisbursementPending);
    tx.set_recipients(&[
        Recipient { account_id: 301, amount: dec!(300) },
        Recipient { account_id: 302, amount: dec!(200) },
    ]);
    h.seed_prepared(&tx).await;
    h.payments
        .set_payment(&tx.transaction_id, true, dec!(500), "NGN")
        .await;

    let processed = h.scheduler().tick(Job::UpdateStatus).await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.wallet.transfers().await.len(), 2);
    assert_eq!(
        h.activity_texts(&tx).await,
        vec![
            DISBURSEMENT_PROCESSING.to_string(),
            DISBURSEMENT_COMPLETE.to_string()
        ]
    );
    assert_eq!(
        h.status_of(&tx).await,
        TransactionStatus::ClosedDisbursementComplete
    );

    // The sender of every transfer is the buyer's escrow balance
    for call in h.wallet.transfers().await {
        if let WalletCall::Transfer { sender, debit_currency, .. } = call {
            assert_eq!(sender, BUYER);
            assert_eq!(debit_currency, "ESCROW_NGN");
        }
    }
}

/// Two jobs with overlapping schedules never execute their bodies at the
/// same instant: the payment mock records the maximum number of in-flight
/// lookups it ever saw, which must stay at one under the shared lock.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_jobs_serialize_under_the_shared_lock() {
    let h = Harness::new();

    // Rows that keep both jobs polling the payment ledger every tick:
    // lookups fail, so neither job ever transitions its rows away.
    for i in 0..5 {
        let mut delivered = base_tx(&format!("tx-d{i}"), TransactionStatus::Delivered);
        delivered.inspection_period = past();
        h.seed_prepared(&delivered).await;

        let pending = base_tx(
            &format!("tx-p{i}"),
            TransactionStatus::ClosedDisbursementPending,
        );
        h.seed_prepared(&pending).await;
    }
    h.payments.fail_lookups(true);
    h.payments.set_lookup_delay_ms(20);

    let scheduler = h.scheduler_with(SchedulerConfig {
        inspection_interval_secs: 0,
        update_status_interval_secs: 0,
        auto_mark_interval_secs: 3600,
        auto_close_interval_secs: 3600,
        transaction_close_interval_secs: 3600,
        batch_size: 20,
    });

    let handles = scheduler.spawn_all();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    for handle in &handles {
        handle.abort();
    }

    // Lookups happened, and never two at once
    assert_eq!(h.payments.max_concurrent(), 1);
}
