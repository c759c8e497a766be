//! Integration tests for the refund saga and the disbursement path.

mod common;

use common::{BUYER, Harness};

use escrowd::clients::WalletCall;
use escrowd::models::Recipient;
use escrowd::refund::RefundState;
use escrowd::status::TransactionStatus;
use escrowd::store::TransactionStore;
use rust_decimal_macros::dec;

#[tokio::test]
async fn refund_debits_escrow_then_credits_buyer() {
    let h = Harness::new();
    let tx = h.seed_transaction("tx-1", TransactionStatus::AcceptedFunded).await;

    h.service
        .refunds()
        .refund(&tx, dec!(500), "NGN")
        .await
        .unwrap();

    let calls = h.wallet.calls().await;
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        WalletCall::Debit {
            account_id,
            amount,
            currency,
            is_refund,
            ..
        } => {
            assert_eq!(*account_id, BUYER);
            assert_eq!(*amount, dec!(500));
            assert_eq!(currency, "ESCROW_NGN");
            assert!(!*is_refund);
        }
        other => panic!("expected debit first, got {other:?}"),
    }
    match &calls[1] {
        WalletCall::Credit {
            account_id,
            amount,
            currency,
            is_refund,
            ..
        } => {
            assert_eq!(*account_id, BUYER);
            assert_eq!(*amount, dec!(500));
            assert_eq!(currency, "NGN");
            assert!(*is_refund);
        }
        other => panic!("expected credit second, got {other:?}"),
    }

    let intent = h
        .store
        .refund_intent_for(&tx.transaction_id, &tx.milestone_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(intent.state, RefundState::Completed);
}

#[tokio::test]
async fn credit_failure_strands_intent_for_resume_without_second_debit() {
    let h = Harness::new();
    let tx = h.seed_transaction("tx-1", TransactionStatus::AcceptedFunded).await;
    h.wallet.fail_credits(true);

    let err = h
        .service
        .refunds()
        .refund(&tx, dec!(500), "NGN")
        .await
        .unwrap_err();
    assert!(err.is_internal());

    // Escrow was debited once, the buyer never credited
    assert_eq!(h.wallet.debits().await.len(), 1);
    assert!(h.wallet.credits().await.is_empty());

    let pending = h.service.refunds().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state, RefundState::CreditPending);
    assert!(pending[0].error.is_some());

    // Resume after the wallet recovers: credit lands, debit stays single
    h.wallet.fail_credits(false);
    let state = h
        .service
        .refunds()
        .resume(&pending[0].intent_id)
        .await
        .unwrap();
    assert_eq!(state, RefundState::Completed);
    assert_eq!(h.wallet.debits().await.len(), 1);
    assert_eq!(h.wallet.credits().await.len(), 1);
}

#[tokio::test]
async fn refund_is_idempotent_per_transaction_row() {
    let h = Harness::new();
    let tx = h.seed_transaction("tx-1", TransactionStatus::AcceptedFunded).await;

    h.service.refunds().refund(&tx, dec!(500), "NGN").await.unwrap();
    h.service.refunds().refund(&tx, dec!(500), "NGN").await.unwrap();

    assert_eq!(h.wallet.debits().await.len(), 1);
    assert_eq!(h.wallet.credits().await.len(), 1);
}

#[tokio::test]
async fn debit_failure_keeps_intent_pending_and_abandonable() {
    let h = Harness::new();
    let tx = h.seed_transaction("tx-1", TransactionStatus::AcceptedFunded).await;
    h.wallet.fail_debits(true);

    let err = h
        .service
        .refunds()
        .refund(&tx, dec!(500), "NGN")
        .await
        .unwrap_err();
    assert!(err.is_internal());
    assert!(h.wallet.calls().await.is_empty());

    let pending = h.service.refunds().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state, RefundState::DebitPending);

    // Nothing moved, so the operator may give up on this intent
    let state = h
        .service
        .refunds()
        .abandon(&pending[0].intent_id)
        .await
        .unwrap();
    assert_eq!(state, RefundState::Failed);
    assert!(h.service.refunds().pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn abandon_is_refused_once_escrow_is_debited() {
    let h = Harness::new();
    let tx = h.seed_transaction("tx-1", TransactionStatus::AcceptedFunded).await;
    h.wallet.fail_credits(true);

    let _ = h.service.refunds().refund(&tx, dec!(500), "NGN").await;
    let pending = h.service.refunds().pending().await.unwrap();
    assert_eq!(pending[0].state, RefundState::CreditPending);

    let err = h
        .service
        .refunds()
        .abandon(&pending[0].intent_id)
        .await
        .unwrap_err();
    assert!(err.is_user_error());
}

#[tokio::test]
async fn refund_without_buyer_party_is_not_found() {
    let h = Harness::new();
    let mut tx = escrowd::Transaction::new(
        "tx-lone",
        "tx-lone-ms",
        "tx-lone-p",
        "biz-1",
        "No parties",
        escrowd::TransactionKind::OneOff,
        dec!(100),
        "NGN",
    );
    tx.status = TransactionStatus::AcceptedFunded;
    h.store.create_transaction(&tx).await.unwrap();

    let err = h
        .service
        .refunds()
        .refund(&tx, dec!(100), "NGN")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.wallet.calls().await.is_empty());
}

fn disbursement_tx(recipients: &[Recipient]) -> escrowd::Transaction {
    let mut tx = escrowd::Transaction::new(
        "tx-1",
        "tx-1-ms",
        "tx-1-p",
        "biz-1",
        "Website build",
        escrowd::TransactionKind::OneOff,
        dec!(500),
        "NGN",
    );
    tx.status = TransactionStatus::ClosedDisbursementPending;
    tx.set_recipients(recipients);
    tx
}

#[tokio::test]
async fn disburse_transfers_per_recipient_from_escrow() {
    let h = Harness::new();
    let tx = disbursement_tx(&[
        Recipient { account_id: 301, amount: dec!(300) },
        Recipient { account_id: 302, amount: dec!(200) },
    ]);
    h.seed_prepared(&tx).await;

    let transferred = h.service.refunds().disburse(&tx).await.unwrap();
    assert_eq!(transferred, 2);

    let transfers = h.wallet.transfers().await;
    assert_eq!(transfers.len(), 2);
    for call in &transfers {
        match call {
            WalletCall::Transfer {
                sender,
                debit_currency,
                credit_currency,
                ..
            } => {
                assert_eq!(*sender, BUYER);
                assert_eq!(debit_currency, "ESCROW_NGN");
                assert_eq!(credit_currency, "NGN");
            }
            other => panic!("expected transfer, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn disburse_continues_past_a_failing_recipient() {
    let h = Harness::new();
    let tx = disbursement_tx(&[
        Recipient { account_id: 301, amount: dec!(300) },
        Recipient { account_id: 302, amount: dec!(200) },
        Recipient { account_id: 303, amount: dec!(100) },
    ]);
    h.seed_prepared(&tx).await;
    h.wallet.fail_transfers_to(302).await;

    let transferred = h.service.refunds().disburse(&tx).await.unwrap();

    // The failing recipient is skipped, the rest still get paid
    assert_eq!(transferred, 2);
    assert_eq!(h.wallet.transfers().await.len(), 2);
}

#[tokio::test]
async fn disburse_rejects_malformed_recipient_json() {
    let h = Harness::new();
    let mut tx = disbursement_tx(&[]);
    tx.recipients = "{not json".to_string();
    h.seed_prepared(&tx).await;

    let err = h.service.refunds().disburse(&tx).await.unwrap_err();
    assert!(err.is_internal());
    assert!(h.wallet.calls().await.is_empty());
}
