//! External collaborator contracts
//!
//! The core only depends on the call contracts of the downstream
//! services: payment ledger, wallet transfers, notification dispatch and
//! business profile/fee lookup. One trait per collaborator; the recording
//! mocks in [`mock`] implement all of them for tests and local wiring.

pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::charge::BusinessCharge;
use crate::error::EscrowError;
use crate::models::AccountId;

pub use mock::{MockBusiness, MockNotifications, MockPayments, MockWallet, WalletCall};

/// Payment record for a transaction, as reported by the payment ledger.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub transaction_id: String,
    pub is_paid: bool,
    pub total_amount: Decimal,
    pub currency: String,
}

/// Business profile fields the reconciliation jobs care about.
#[derive(Debug, Clone, Default)]
pub struct BusinessProfile {
    pub business_id: String,
    /// When set, the auto-mark job may deliver this business's overdue
    /// transactions without a live actor.
    pub auto_transaction_status: bool,
}

/// Lifecycle events dispatched to the notification service,
/// fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Accepted,
    Rejected,
    Delivered,
    DeliveryRejected,
    Satisfied,
    DisputeOpened,
    ExtensionRequested,
    DueDateExtended,
    StatusChanged,
    Deleted,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Accepted => "transaction_accepted",
            LifecycleEvent::Rejected => "transaction_rejected",
            LifecycleEvent::Delivered => "transaction_delivered",
            LifecycleEvent::DeliveryRejected => "delivery_rejected",
            LifecycleEvent::Satisfied => "transaction_satisfied",
            LifecycleEvent::DisputeOpened => "dispute_opened",
            LifecycleEvent::ExtensionRequested => "due_date_extension_requested",
            LifecycleEvent::DueDateExtended => "due_date_extended",
            LifecycleEvent::StatusChanged => "status_changed",
            LifecycleEvent::Deleted => "transaction_deleted",
        }
    }
}

/// Payment ledger service.
#[async_trait]
pub trait PaymentsClient: Send + Sync {
    /// Fetch the payment record for a transaction. `NotFound` when no
    /// payment has been initiated.
    async fn list_payment(&self, transaction_id: &str) -> Result<PaymentRecord, EscrowError>;

    /// Ask the payment service to process a refund manually (reject-after-
    /// payment path).
    async fn request_manual_refund(&self, transaction_id: &str) -> Result<(), EscrowError>;
}

/// Wallet service. `key` is the caller's idempotency key: repeating a call
/// with a key the wallet has already applied must be a no-op success.
#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn debit(
        &self,
        key: &str,
        account_id: AccountId,
        amount: Decimal,
        currency: &str,
        is_refund: bool,
        transaction_id: &str,
    ) -> Result<(), EscrowError>;

    async fn credit(
        &self,
        key: &str,
        account_id: AccountId,
        amount: Decimal,
        currency: &str,
        is_refund: bool,
        transaction_id: &str,
    ) -> Result<(), EscrowError>;

    /// Move funds between two wallets, debiting `debit_currency` from the
    /// sender and crediting `credit_currency` to the recipient.
    async fn transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Decimal,
        debit_currency: &str,
        credit_currency: &str,
        transaction_id: &str,
    ) -> Result<(), EscrowError>;
}

/// Notification dispatch, one call per lifecycle event.
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn notify(&self, event: LifecycleEvent, transaction_id: &str)
        -> Result<(), EscrowError>;
}

/// Business profile and fee schedule service.
#[async_trait]
pub trait BusinessClient: Send + Sync {
    async fn get_profile(&self, business_id: &str) -> Result<BusinessProfile, EscrowError>;

    /// Fee schedule for a business/currency pair, `None` when no schedule
    /// has been configured yet.
    async fn get_charge(
        &self,
        business_id: &str,
        currency: &str,
    ) -> Result<Option<BusinessCharge>, EscrowError>;

    /// Create the default fee schedule for a business/currency pair.
    /// Fallback when [`Self::get_charge`] finds nothing.
    async fn init_charge(
        &self,
        business_id: &str,
        currency: &str,
    ) -> Result<BusinessCharge, EscrowError>;
}
