//! Lifecycle transition service
//!
//! Synchronous operations invoked by external requests and, on behalf of
//! absent actors, by the reconciliation jobs. Every operation loads the
//! transaction (NotFound on a miss), validates role or ownership where
//! one applies, then writes one or more status transitions, each paired
//! with an append-only audit entry. Notifications are fire-and-forget:
//! a dispatch failure is logged and never blocks the transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::charge;
use crate::clients::{
    BusinessClient, LifecycleEvent, NotificationClient, PaymentsClient, WalletClient,
};
use crate::error::EscrowError;
use crate::models::{
    AccountId, ActivityLog, Dispute, DueDateExtensionRequest, EpochSeconds, PartyRole, StateEntry,
    Transaction,
};
use crate::refund::RefundOrchestrator;
use crate::status::TransactionStatus;
use crate::store::TransactionStore;

/// Activity-log text written alongside a generic status update, where the
/// status has one.
fn activity_message(status: TransactionStatus) -> Option<&'static str> {
    match status {
        TransactionStatus::AcceptedFunded => Some("transaction accepted and funded"),
        TransactionStatus::AcceptedNotFunded => Some("transaction accepted, awaiting funding"),
        TransactionStatus::InProgress => Some("transaction in progress"),
        TransactionStatus::Delivered => Some("transaction marked as delivered"),
        TransactionStatus::DeliveredAccepted => Some("delivery accepted by buyer"),
        TransactionStatus::DeliveredRejected => Some("delivery rejected by buyer"),
        TransactionStatus::ClosedDisputed => Some("transaction closed following a dispute"),
        TransactionStatus::ClosedRefunded => Some("transaction closed and refunded"),
        TransactionStatus::Closed => Some("transaction closed"),
        _ => None,
    }
}

pub struct LifecycleService {
    store: Arc<dyn TransactionStore>,
    payments: Arc<dyn PaymentsClient>,
    notifications: Arc<dyn NotificationClient>,
    business: Arc<dyn BusinessClient>,
    refunds: RefundOrchestrator,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        payments: Arc<dyn PaymentsClient>,
        wallet: Arc<dyn WalletClient>,
        notifications: Arc<dyn NotificationClient>,
        business: Arc<dyn BusinessClient>,
    ) -> Self {
        let refunds = RefundOrchestrator::new(store.clone(), wallet);
        Self {
            store,
            payments,
            notifications,
            business,
            refunds,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Access to the refund orchestrator for the reconciliation jobs.
    pub fn refunds(&self) -> &RefundOrchestrator {
        &self.refunds
    }

    /// Accept the transaction. Lands in `Accepted - Funded` when the
    /// payment ledger reports it paid, `Accepted - Not Funded` otherwise.
    pub async fn accept(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        actor: AccountId,
    ) -> Result<TransactionStatus, EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        if tx.status.is_accepted() {
            return Err(EscrowError::Invalid(format!(
                "transaction {transaction_id} is already accepted"
            )));
        }

        let status = if self.is_paid(&tx.transaction_id).await? {
            TransactionStatus::AcceptedFunded
        } else {
            TransactionStatus::AcceptedNotFunded
        };
        self.transition(&tx, status, actor).await?;
        self.notify(LifecycleEvent::Accepted, &tx.transaction_id).await;
        Ok(status)
    }

    /// Reject the transaction. A paid transaction goes through
    /// `Funded - Rejected`, a manual-refund request to the payment
    /// service, then `Closed - Refunded`; an unpaid one goes through
    /// `Sent - Rejected` then `Closed`.
    pub async fn reject(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        actor: AccountId,
        reason: &str,
    ) -> Result<TransactionStatus, EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        let paid = self.is_paid(&tx.transaction_id).await?;

        let final_status = if paid {
            self.transition(&tx, TransactionStatus::FundedRejected, actor).await?;
            self.record_rejection(&tx, reason).await?;
            self.payments.request_manual_refund(&tx.transaction_id).await?;
            self.transition(&tx, TransactionStatus::ClosedRefunded, actor).await?;
            TransactionStatus::ClosedRefunded
        } else {
            self.transition(&tx, TransactionStatus::SentRejected, actor).await?;
            self.record_rejection(&tx, reason).await?;
            self.transition(&tx, TransactionStatus::Closed, actor).await?;
            TransactionStatus::Closed
        };

        self.notify(LifecycleEvent::Rejected, &tx.transaction_id).await;
        Ok(final_status)
    }

    /// Reject a delivery: `Delivered - Rejected`, then immediately
    /// `Closed` (two audit entries).
    pub async fn reject_delivery(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        actor: AccountId,
    ) -> Result<(), EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        self.transition(&tx, TransactionStatus::DeliveredRejected, actor).await?;
        self.transition(&tx, TransactionStatus::Closed, actor).await?;
        self.notify(LifecycleEvent::DeliveryRejected, &tx.transaction_id).await;
        Ok(())
    }

    /// Mark a milestone delivered.
    pub async fn deliver(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        actor: AccountId,
    ) -> Result<(), EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        self.transition(&tx, TransactionStatus::Delivered, actor).await?;
        self.notify(LifecycleEvent::Delivered, &tx.transaction_id).await;
        Ok(())
    }

    /// Buyer marks the delivery satisfied: `Delivered - Accepted`, then
    /// immediately `Closed - Disbursement Pending`. Only the buyer party
    /// account may call this.
    pub async fn satisfied(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        caller: AccountId,
    ) -> Result<(), EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        let buyer = self.store.require_party(&tx.parties_id, PartyRole::Buyer).await?;
        if buyer.account_id != caller {
            return Err(EscrowError::Unauthorized(
                "only the buyer may mark a delivery satisfied".to_string(),
            ));
        }

        self.mark_satisfied(&tx, caller).await?;
        self.notify(LifecycleEvent::Satisfied, &tx.transaction_id).await;
        Ok(())
    }

    /// Open a dispute and close the transaction as disputed. At most one
    /// live dispute per transaction.
    pub async fn create_dispute(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        caller: AccountId,
        reason: &str,
    ) -> Result<Dispute, EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        if self.store.dispute(&tx.transaction_id).await?.is_some() {
            return Err(EscrowError::Invalid(format!(
                "transaction {transaction_id} already has a live dispute"
            )));
        }

        let dispute = Dispute::open(&tx.transaction_id, caller, reason);
        self.store.create_dispute(&dispute).await?;
        self.transition(&tx, TransactionStatus::ClosedDisputed, caller).await?;
        self.notify(LifecycleEvent::DisputeOpened, &tx.transaction_id).await;
        Ok(dispute)
    }

    /// Seller proposes a new due date / inspection period. Creates the
    /// proposal row only; no status change.
    pub async fn request_due_date_extension(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        caller: AccountId,
        due_date: EpochSeconds,
        inspection_period: EpochSeconds,
    ) -> Result<DueDateExtensionRequest, EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        let seller = self.store.require_party(&tx.parties_id, PartyRole::Seller).await?;
        if seller.account_id != caller {
            return Err(EscrowError::Unauthorized(
                "only the seller may request a due-date extension".to_string(),
            ));
        }

        let request = DueDateExtensionRequest {
            request_id: Uuid::new_v4().to_string(),
            transaction_id: tx.transaction_id.clone(),
            milestone_id: tx.milestone_id.clone(),
            account_id: caller,
            due_date,
            inspection_period,
            created_at: Utc::now(),
        };
        self.store.create_extension_request(&request).await?;
        self.notify(LifecycleEvent::ExtensionRequested, &tx.transaction_id).await;
        Ok(request)
    }

    /// Buyer approves the latest extension proposal: the transaction's
    /// `due_date`/`inspection_period` are mutated in place. The proposal
    /// row itself is never marked approved.
    pub async fn approve_due_date_extension(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        caller: AccountId,
    ) -> Result<(), EscrowError> {
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;
        let buyer = self.store.require_party(&tx.parties_id, PartyRole::Buyer).await?;
        if buyer.account_id != caller {
            return Err(EscrowError::Unauthorized(
                "only the buyer may approve a due-date extension".to_string(),
            ));
        }

        let request = self
            .store
            .extension_requests(transaction_id, milestone_id)
            .await?
            .into_iter()
            .last()
            .ok_or_else(|| EscrowError::not_found("due-date extension request"))?;

        self.store
            .update_schedule(
                transaction_id,
                milestone_id,
                request.due_date,
                request.inspection_period,
            )
            .await?;
        self.notify(LifecycleEvent::DueDateExtended, &tx.transaction_id).await;
        Ok(())
    }

    /// Generic status update by short code. The code must exist in the
    /// registry; `da` chains into `Closed - Disbursement Pending` exactly
    /// like [`Self::satisfied`].
    pub async fn update_status(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        actor: AccountId,
        code: &str,
    ) -> Result<TransactionStatus, EscrowError> {
        let status = TransactionStatus::lookup(code).ok_or_else(|| {
            EscrowError::Invalid(format!("unknown status code {code:?}"))
        })?;
        let tx = self.store.require_transaction(transaction_id, milestone_id).await?;

        self.transition(&tx, status, actor).await?;
        if let Some(message) = activity_message(status) {
            self.store
                .append_activity(&ActivityLog::new(&tx.transaction_id, message))
                .await?;
        }

        let final_status = if status == TransactionStatus::DeliveredAccepted {
            self.transition(&tx, TransactionStatus::ClosedDisbursementPending, actor)
                .await?;
            TransactionStatus::ClosedDisbursementPending
        } else {
            status
        };

        self.notify(LifecycleEvent::StatusChanged, &tx.transaction_id).await;
        Ok(final_status)
    }

    /// Delete a transaction. Writes one terminal `Deleted` audit entry per
    /// milestone row, then removes the rows.
    pub async fn delete(
        &self,
        transaction_id: &str,
        actor: AccountId,
    ) -> Result<(), EscrowError> {
        let rows = self.store.milestones(transaction_id).await?;
        if rows.is_empty() {
            return Err(EscrowError::not_found("transaction"));
        }

        for row in &rows {
            self.store
                .append_state(&StateEntry::new(
                    actor,
                    &row.transaction_id,
                    &row.milestone_id,
                    TransactionStatus::Deleted,
                ))
                .await?;
        }
        self.store.delete_transaction(transaction_id).await?;
        info!(transaction_id, rows = rows.len(), "transaction deleted");
        self.notify(LifecycleEvent::Deleted, transaction_id).await;
        Ok(())
    }

    /// User-facing charge quote for a prospective transaction, rounded to
    /// four decimal places. Falls back to initialising the business's
    /// default schedule when none exists yet.
    pub async fn quote_charge(
        &self,
        business_id: &str,
        currency: &str,
        total: Decimal,
    ) -> Result<Decimal, EscrowError> {
        let schedule = match self.business.get_charge(business_id, currency).await? {
            Some(schedule) => schedule,
            None => self.business.init_charge(business_id, currency).await?,
        };
        Ok(charge::quote_charge(&schedule, total))
    }

    /// Activity-log read surface.
    pub async fn activities(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<crate::models::ActivityLog>, EscrowError> {
        self.store.activities_for(transaction_id).await
    }

    /// When the transaction closed, per the audit trail.
    pub async fn closed_at(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<DateTime<Utc>>, EscrowError> {
        self.store.closed_at(transaction_id, milestone_id).await
    }

    /// Shared satisfied path: two transitions, two audit entries. Also
    /// used by the inspection-period job on behalf of the buyer and by
    /// the `da` branch of the generic update.
    pub(crate) async fn mark_satisfied(
        &self,
        tx: &Transaction,
        actor: AccountId,
    ) -> Result<(), EscrowError> {
        self.transition(tx, TransactionStatus::DeliveredAccepted, actor).await?;
        self.transition(tx, TransactionStatus::ClosedDisbursementPending, actor)
            .await?;
        Ok(())
    }

    /// One status write paired with one audit append.
    pub(crate) async fn transition(
        &self,
        tx: &Transaction,
        status: TransactionStatus,
        actor: AccountId,
    ) -> Result<(), EscrowError> {
        self.store
            .update_status(&tx.transaction_id, &tx.milestone_id, status)
            .await?;
        self.store
            .append_state(&StateEntry::new(
                actor,
                &tx.transaction_id,
                &tx.milestone_id,
                status,
            ))
            .await?;
        info!(
            transaction_id = %tx.transaction_id,
            milestone_id = %tx.milestone_id,
            status = status.label(),
            "status transition"
        );
        Ok(())
    }

    /// Whether the payment ledger reports this transaction paid. A
    /// missing payment record means unpaid; any other lookup failure
    /// aborts the operation.
    pub(crate) async fn is_paid(&self, transaction_id: &str) -> Result<bool, EscrowError> {
        match self.payments.list_payment(transaction_id).await {
            Ok(payment) => Ok(payment.is_paid),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn record_rejection(&self, tx: &Transaction, reason: &str) -> Result<(), EscrowError> {
        self.store
            .append_activity(&ActivityLog::new(
                &tx.transaction_id,
                format!("rejected: {reason}"),
            ))
            .await
    }

    /// Best-effort notification; failures are logged, never surfaced.
    async fn notify(&self, event: LifecycleEvent, transaction_id: &str) {
        if let Err(e) = self.notifications.notify(event, transaction_id).await {
            warn!(
                transaction_id,
                event = event.as_str(),
                error = %e,
                "notification dispatch failed"
            );
        }
    }
}
