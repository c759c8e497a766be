//! Recording mock collaborators
//!
//! In-memory implementations of the client traits that record every call
//! and can be programmed to fail, so tests can assert exactly which
//! remote effects a transition produced. The wallet mock honours
//! idempotency keys the way the real service does: a repeated key is a
//! no-op success.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::charge::BusinessCharge;
use crate::error::EscrowError;
use crate::models::AccountId;

use super::{
    BusinessClient, BusinessProfile, LifecycleEvent, NotificationClient, PaymentRecord,
    PaymentsClient, WalletClient,
};

/// Mock payment ledger.
///
/// Also carries a concurrency probe: `max_concurrent()` reports the
/// largest number of in-flight `list_payment` calls ever observed, which
/// the scheduler tests use to verify the shared job lock.
#[derive(Default)]
pub struct MockPayments {
    records: Mutex<HashMap<String, PaymentRecord>>,
    manual_refunds: Mutex<Vec<String>>,
    fail_lookups: AtomicBool,
    fail_manual_refund: AtomicBool,
    lookup_delay_ms: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_payment(&self, transaction_id: &str, is_paid: bool, total: Decimal, currency: &str) {
        self.records.lock().await.insert(
            transaction_id.to_string(),
            PaymentRecord {
                transaction_id: transaction_id.to_string(),
                is_paid,
                total_amount: total,
                currency: currency.to_string(),
            },
        );
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_manual_refund(&self, fail: bool) {
        self.fail_manual_refund.store(fail, Ordering::SeqCst);
    }

    /// Artificial latency per lookup, to widen the window the concurrency
    /// probe samples.
    pub fn set_lookup_delay_ms(&self, ms: u64) {
        self.lookup_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub async fn manual_refund_calls(&self) -> Vec<String> {
        self.manual_refunds.lock().await.clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentsClient for MockPayments {
    async fn list_payment(&self, transaction_id: &str) -> Result<PaymentRecord, EscrowError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        let result = if self.fail_lookups.load(Ordering::SeqCst) {
            Err(EscrowError::upstream("payments", "lookup unavailable"))
        } else {
            self.records
                .lock()
                .await
                .get(transaction_id)
                .cloned()
                .ok_or_else(|| EscrowError::not_found("payment"))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn request_manual_refund(&self, transaction_id: &str) -> Result<(), EscrowError> {
        if self.fail_manual_refund.load(Ordering::SeqCst) {
            return Err(EscrowError::upstream("payments", "manual refund rejected"));
        }
        self.manual_refunds
            .lock()
            .await
            .push(transaction_id.to_string());
        Ok(())
    }
}

/// One recorded wallet call.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletCall {
    Debit {
        key: String,
        account_id: AccountId,
        amount: Decimal,
        currency: String,
        is_refund: bool,
        transaction_id: String,
    },
    Credit {
        key: String,
        account_id: AccountId,
        amount: Decimal,
        currency: String,
        is_refund: bool,
        transaction_id: String,
    },
    Transfer {
        sender: AccountId,
        recipient: AccountId,
        amount: Decimal,
        debit_currency: String,
        credit_currency: String,
        transaction_id: String,
    },
}

/// Mock wallet with idempotency-key semantics.
#[derive(Default)]
pub struct MockWallet {
    calls: Mutex<Vec<WalletCall>>,
    applied_keys: Mutex<HashSet<String>>,
    fail_debits: AtomicBool,
    fail_credits: AtomicBool,
    fail_transfers_to: Mutex<HashSet<AccountId>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_debits(&self, fail: bool) {
        self.fail_debits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }

    pub async fn fail_transfers_to(&self, account_id: AccountId) {
        self.fail_transfers_to.lock().await.insert(account_id);
    }

    pub async fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().await.clone()
    }

    pub async fn debits(&self) -> Vec<WalletCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, WalletCall::Debit { .. }))
            .collect()
    }

    pub async fn credits(&self) -> Vec<WalletCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, WalletCall::Credit { .. }))
            .collect()
    }

    pub async fn transfers(&self) -> Vec<WalletCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, WalletCall::Transfer { .. }))
            .collect()
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn debit(
        &self,
        key: &str,
        account_id: AccountId,
        amount: Decimal,
        currency: &str,
        is_refund: bool,
        transaction_id: &str,
    ) -> Result<(), EscrowError> {
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(EscrowError::upstream("wallet", "debit failed"));
        }
        if !self.applied_keys.lock().await.insert(key.to_string()) {
            // Already applied: idempotent no-op
            return Ok(());
        }
        self.calls.lock().await.push(WalletCall::Debit {
            key: key.to_string(),
            account_id,
            amount,
            currency: currency.to_string(),
            is_refund,
            transaction_id: transaction_id.to_string(),
        });
        Ok(())
    }

    async fn credit(
        &self,
        key: &str,
        account_id: AccountId,
        amount: Decimal,
        currency: &str,
        is_refund: bool,
        transaction_id: &str,
    ) -> Result<(), EscrowError> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(EscrowError::upstream("wallet", "credit failed"));
        }
        if !self.applied_keys.lock().await.insert(key.to_string()) {
            return Ok(());
        }
        self.calls.lock().await.push(WalletCall::Credit {
            key: key.to_string(),
            account_id,
            amount,
            currency: currency.to_string(),
            is_refund,
            transaction_id: transaction_id.to_string(),
        });
        Ok(())
    }

    async fn transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Decimal,
        debit_currency: &str,
        credit_currency: &str,
        transaction_id: &str,
    ) -> Result<(), EscrowError> {
        if self.fail_transfers_to.lock().await.contains(&recipient) {
            return Err(EscrowError::upstream("wallet", "transfer rejected"));
        }
        self.calls.lock().await.push(WalletCall::Transfer {
            sender,
            recipient,
            amount,
            debit_currency: debit_currency.to_string(),
            credit_currency: credit_currency.to_string(),
            transaction_id: transaction_id.to_string(),
        });
        Ok(())
    }
}

/// Mock notification dispatch.
#[derive(Default)]
pub struct MockNotifications {
    events: Mutex<Vec<(LifecycleEvent, String)>>,
    fail: AtomicBool,
}

impl MockNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<(LifecycleEvent, String)> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl NotificationClient for MockNotifications {
    async fn notify(
        &self,
        event: LifecycleEvent,
        transaction_id: &str,
    ) -> Result<(), EscrowError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EscrowError::upstream("notifications", "dispatch failed"));
        }
        self.events
            .lock()
            .await
            .push((event, transaction_id.to_string()));
        Ok(())
    }
}

/// Mock business profile/fee service.
#[derive(Default)]
pub struct MockBusiness {
    profiles: Mutex<HashMap<String, BusinessProfile>>,
    charges: Mutex<HashMap<(String, String), BusinessCharge>>,
    init_calls: Mutex<Vec<(String, String)>>,
}

impl MockBusiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_profile(&self, business_id: &str, auto_transaction_status: bool) {
        self.profiles.lock().await.insert(
            business_id.to_string(),
            BusinessProfile {
                business_id: business_id.to_string(),
                auto_transaction_status,
            },
        );
    }

    pub async fn set_charge(&self, schedule: BusinessCharge) {
        self.charges.lock().await.insert(
            (schedule.business_id.clone(), schedule.currency.clone()),
            schedule,
        );
    }

    pub async fn init_calls(&self) -> Vec<(String, String)> {
        self.init_calls.lock().await.clone()
    }
}

#[async_trait]
impl BusinessClient for MockBusiness {
    async fn get_profile(&self, business_id: &str) -> Result<BusinessProfile, EscrowError> {
        self.profiles
            .lock()
            .await
            .get(business_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found("business profile"))
    }

    async fn get_charge(
        &self,
        business_id: &str,
        currency: &str,
    ) -> Result<Option<BusinessCharge>, EscrowError> {
        Ok(self
            .charges
            .lock()
            .await
            .get(&(business_id.to_string(), currency.to_string()))
            .cloned())
    }

    async fn init_charge(
        &self,
        business_id: &str,
        currency: &str,
    ) -> Result<BusinessCharge, EscrowError> {
        self.init_calls
            .lock()
            .await
            .push((business_id.to_string(), currency.to_string()));
        let schedule = BusinessCharge {
            business_id: business_id.to_string(),
            currency: currency.to_string(),
            business_charge: "0".to_string(),
            platform_charge: "0".to_string(),
            processing_fee: "0".to_string(),
            min: None,
            mid: None,
            max: None,
        };
        self.charges.lock().await.insert(
            (business_id.to_string(), currency.to_string()),
            schedule.clone(),
        );
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_wallet_idempotency_keys() {
        let wallet = MockWallet::new();
        wallet
            .debit("k1", 1, dec!(10), "ESCROW_NGN", false, "tx-1")
            .await
            .unwrap();
        wallet
            .debit("k1", 1, dec!(10), "ESCROW_NGN", false, "tx-1")
            .await
            .unwrap();
        assert_eq!(wallet.debits().await.len(), 1);
    }

    #[tokio::test]
    async fn test_payments_not_found_vs_failure() {
        let payments = MockPayments::new();
        assert!(payments.list_payment("tx-1").await.unwrap_err().is_not_found());

        payments.fail_lookups(true);
        let err = payments.list_payment("tx-1").await.unwrap_err();
        assert!(err.is_internal());
    }
}
