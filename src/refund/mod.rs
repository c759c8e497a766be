//! Refund and disbursement orchestration
//!
//! The refund is a two-call sequence with no distributed transaction:
//! debit the escrow-namespaced wallet, then credit the buyer. Each step
//! persists its pending state *before* the remote call and carries an
//! idempotency key derived from the intent id, so a crash or a partial
//! failure is resumable instead of leaving money silently stranded.
//!
//! Once the escrow debit has landed, the intent is never failed
//! automatically: a credit failure is an operator-visible error and the
//! intent stays in `CreditPending` until a resume succeeds.

pub mod intent;

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::clients::WalletClient;
use crate::error::EscrowError;
use crate::models::{PartyRole, Transaction};
use crate::store::TransactionStore;

pub use intent::{RefundIntent, RefundState};

/// Wallet namespace funds are held in while escrowed.
pub fn escrow_currency(currency: &str) -> String {
    format!("ESCROW_{currency}")
}

pub struct RefundOrchestrator {
    store: Arc<dyn TransactionStore>,
    wallet: Arc<dyn WalletClient>,
}

impl RefundOrchestrator {
    pub fn new(store: Arc<dyn TransactionStore>, wallet: Arc<dyn WalletClient>) -> Self {
        Self { store, wallet }
    }

    /// Refund `amount` of `currency` to the transaction's buyer.
    ///
    /// Idempotent per transaction row: a live intent is resumed and a
    /// completed one short-circuits, so reconciliation re-runs never
    /// debit escrow twice. Returns an error unless the intent reached
    /// `Completed`; the persisted intent survives for [`Self::resume`].
    pub async fn refund(
        &self,
        tx: &Transaction,
        amount: Decimal,
        currency: &str,
    ) -> Result<(), EscrowError> {
        let buyer = self.store.require_party(&tx.parties_id, PartyRole::Buyer).await?;

        let intent = match self
            .store
            .refund_intent_for(&tx.transaction_id, &tx.milestone_id)
            .await?
        {
            Some(existing) if existing.state == RefundState::Completed => {
                debug!(intent_id = %existing.intent_id, "refund already completed");
                return Ok(());
            }
            Some(existing) if !existing.state.is_terminal() => existing,
            _ => {
                let intent = RefundIntent::new(
                    &tx.transaction_id,
                    &tx.milestone_id,
                    buyer.account_id,
                    amount,
                    currency,
                );
                self.store.create_refund_intent(&intent).await?;
                info!(intent_id = %intent.intent_id, transaction_id = %tx.transaction_id, "refund intent created");
                intent
            }
        };

        let state = self.drive(&intent.intent_id).await?;
        if state == RefundState::Completed {
            Ok(())
        } else {
            Err(EscrowError::upstream(
                "wallet",
                format!("refund intent {} stalled in {state}", intent.intent_id),
            ))
        }
    }

    /// Resume a persisted intent towards a terminal state.
    pub async fn resume(&self, intent_id: &str) -> Result<RefundState, EscrowError> {
        self.drive(intent_id).await
    }

    /// All intents still awaiting resolution.
    pub async fn pending(&self) -> Result<Vec<RefundIntent>, EscrowError> {
        self.store.pending_intents().await
    }

    /// Operator give-up on an intent whose debit has never landed. Once
    /// funds are in flight the only way out is a successful credit.
    pub async fn abandon(&self, intent_id: &str) -> Result<RefundState, EscrowError> {
        let intent = self
            .store
            .refund_intent(intent_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("refund intent"))?;
        if intent.state.funds_in_flight() {
            return Err(EscrowError::Invalid(format!(
                "intent {intent_id} has escrow funds in flight and cannot be abandoned"
            )));
        }
        if intent.state.is_terminal() {
            return Ok(intent.state);
        }
        self.store
            .update_intent_state(intent_id, intent.state, RefundState::Failed, Some("abandoned"))
            .await?;
        Ok(RefundState::Failed)
    }

    /// Run steps until terminal or no further progress is made.
    async fn drive(&self, intent_id: &str) -> Result<RefundState, EscrowError> {
        let mut state = self
            .store
            .refund_intent(intent_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("refund intent"))?
            .state;

        loop {
            let next = self.step(intent_id).await?;
            if next.is_terminal() {
                return Ok(next);
            }
            if next == state {
                self.store.increment_intent_retry(intent_id).await?;
                return Ok(next);
            }
            state = next;
        }
    }

    /// Execute one saga step. Returns the state after processing.
    pub async fn step(&self, intent_id: &str) -> Result<RefundState, EscrowError> {
        let intent = self
            .store
            .refund_intent(intent_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("refund intent"))?;

        match intent.state {
            RefundState::Init => {
                // Persist the pending state before the remote call
                if !self
                    .store
                    .update_intent_state(
                        intent_id,
                        RefundState::Init,
                        RefundState::DebitPending,
                        None,
                    )
                    .await?
                {
                    return self.current_state(intent_id).await;
                }
                self.attempt_debit(&intent).await
            }
            RefundState::DebitPending => self.attempt_debit(&intent).await,
            RefundState::Debited => {
                if !self
                    .store
                    .update_intent_state(
                        intent_id,
                        RefundState::Debited,
                        RefundState::CreditPending,
                        None,
                    )
                    .await?
                {
                    return self.current_state(intent_id).await;
                }
                self.attempt_credit(&intent).await
            }
            RefundState::CreditPending => self.attempt_credit(&intent).await,
            terminal => Ok(terminal),
        }
    }

    async fn attempt_debit(&self, intent: &RefundIntent) -> Result<RefundState, EscrowError> {
        let result = self
            .wallet
            .debit(
                &intent.debit_key(),
                intent.account_id,
                intent.amount,
                &escrow_currency(&intent.currency),
                false,
                &intent.transaction_id,
            )
            .await;

        match result {
            Ok(()) => {
                self.store
                    .update_intent_state(
                        &intent.intent_id,
                        RefundState::DebitPending,
                        RefundState::Debited,
                        None,
                    )
                    .await?;
                Ok(RefundState::Debited)
            }
            Err(e) => {
                // Call outcome unknown: stay pending, the idempotency key
                // makes the retry safe
                warn!(intent_id = %intent.intent_id, error = %e, "escrow debit failed, will retry");
                Ok(RefundState::DebitPending)
            }
        }
    }

    async fn attempt_credit(&self, intent: &RefundIntent) -> Result<RefundState, EscrowError> {
        let result = self
            .wallet
            .credit(
                &intent.credit_key(),
                intent.account_id,
                intent.amount,
                &intent.currency,
                true,
                &intent.transaction_id,
            )
            .await;

        match result {
            Ok(()) => {
                self.store
                    .update_intent_state(
                        &intent.intent_id,
                        RefundState::CreditPending,
                        RefundState::Completed,
                        None,
                    )
                    .await?;
                info!(intent_id = %intent.intent_id, "refund completed");
                Ok(RefundState::Completed)
            }
            Err(e) => {
                // Escrow has been debited, buyer not credited. Requires an
                // operator-driven resume; never retried blindly here.
                error!(
                    intent_id = %intent.intent_id,
                    transaction_id = %intent.transaction_id,
                    error = %e,
                    "escrow debited but buyer credit failed"
                );
                self.store
                    .update_intent_state(
                        &intent.intent_id,
                        RefundState::CreditPending,
                        RefundState::CreditPending,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(RefundState::CreditPending)
            }
        }
    }

    async fn current_state(&self, intent_id: &str) -> Result<RefundState, EscrowError> {
        Ok(self
            .store
            .refund_intent(intent_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("refund intent"))?
            .state)
    }

    /// Pay out the milestone recipients from the buyer's escrow balance.
    ///
    /// Per-recipient failures are logged and do not halt the remaining
    /// transfers. Returns the number of transfers that went through.
    pub async fn disburse(&self, tx: &Transaction) -> Result<usize, EscrowError> {
        let buyer = self.store.require_party(&tx.parties_id, PartyRole::Buyer).await?;
        let recipients = tx.recipients()?;
        if recipients.is_empty() {
            warn!(transaction_id = %tx.transaction_id, "no recipients to disburse to");
            return Ok(0);
        }

        let debit_currency = escrow_currency(&tx.currency);
        let mut transferred = 0usize;
        for recipient in &recipients {
            match self
                .wallet
                .transfer(
                    buyer.account_id,
                    recipient.account_id,
                    recipient.amount,
                    &debit_currency,
                    &tx.currency,
                    &tx.transaction_id,
                )
                .await
            {
                Ok(()) => transferred += 1,
                Err(e) => {
                    warn!(
                        transaction_id = %tx.transaction_id,
                        recipient = recipient.account_id,
                        error = %e,
                        "recipient transfer failed"
                    );
                }
            }
        }

        info!(
            transaction_id = %tx.transaction_id,
            transferred,
            total = recipients.len(),
            "disbursement finished"
        );
        Ok(transferred)
    }
}
