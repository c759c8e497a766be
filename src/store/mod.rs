//! Transaction entity store
//!
//! Persistence boundary for transactions, the append-only audit trail,
//! parties, disputes, broker terms, extension proposals, activity logs
//! and refund intents. Two backends: [`MemoryStore`] for tests and local
//! wiring, [`PgStore`] for PostgreSQL.
//!
//! Pairing a status write with its audit append is the transition
//! service's obligation, not the store's; the store only guarantees each
//! individual write.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EscrowError;
use crate::models::{
    ActivityLog, Broker, Dispute, DueDateExtensionRequest, EpochSeconds, Party, PartyRole,
    StateEntry, Transaction,
};
use crate::refund::{RefundIntent, RefundState};
use crate::status::TransactionStatus;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    // --- transactions ---

    async fn create_transaction(&self, tx: &Transaction) -> Result<(), EscrowError>;

    async fn transaction(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<Transaction>, EscrowError>;

    /// All milestone rows of a transaction, in milestone order.
    async fn milestones(&self, transaction_id: &str) -> Result<Vec<Transaction>, EscrowError>;

    async fn update_status(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        status: TransactionStatus,
    ) -> Result<(), EscrowError>;

    /// Mutate the due date and inspection period in place (extension
    /// approval).
    async fn update_schedule(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        due_date: EpochSeconds,
        inspection_period: EpochSeconds,
    ) -> Result<(), EscrowError>;

    /// Remove all rows of a transaction. The terminal `deleted` audit
    /// entry is written by the caller before this.
    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), EscrowError>;

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, EscrowError>;

    /// Rows whose status is not `Delivered` (auto-mark scan).
    async fn list_not_delivered(&self) -> Result<Vec<Transaction>, EscrowError>;

    /// Still-open rows whose due date lies before `now`, at most `limit`
    /// of them (transaction-close scan).
    async fn list_open_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, EscrowError>;

    // --- audit trail ---

    async fn append_state(&self, entry: &StateEntry) -> Result<(), EscrowError>;

    async fn states_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<StateEntry>, EscrowError>;

    async fn latest_state(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<StateEntry>, EscrowError>;

    // --- parties ---

    async fn upsert_party(&self, party: &Party) -> Result<(), EscrowError>;

    async fn party_by_role(
        &self,
        parties_id: &str,
        role: PartyRole,
    ) -> Result<Option<Party>, EscrowError>;

    async fn parties(&self, parties_id: &str) -> Result<Vec<Party>, EscrowError>;

    // --- disputes ---

    async fn create_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError>;

    async fn dispute(&self, transaction_id: &str) -> Result<Option<Dispute>, EscrowError>;

    async fn update_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError>;

    // --- broker terms ---

    async fn upsert_broker(&self, broker: &Broker) -> Result<(), EscrowError>;

    async fn broker(&self, transaction_id: &str) -> Result<Option<Broker>, EscrowError>;

    // --- due-date extension proposals ---

    async fn create_extension_request(
        &self,
        request: &DueDateExtensionRequest,
    ) -> Result<(), EscrowError>;

    async fn extension_requests(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<DueDateExtensionRequest>, EscrowError>;

    // --- activity log ---

    async fn append_activity(&self, log: &ActivityLog) -> Result<(), EscrowError>;

    async fn activities_for(&self, transaction_id: &str) -> Result<Vec<ActivityLog>, EscrowError>;

    // --- refund intents ---

    async fn create_refund_intent(&self, intent: &RefundIntent) -> Result<(), EscrowError>;

    async fn refund_intent(&self, intent_id: &str) -> Result<Option<RefundIntent>, EscrowError>;

    /// Latest intent for a transaction/milestone pair, terminal or not.
    async fn refund_intent_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<RefundIntent>, EscrowError>;

    /// Atomic compare-and-swap on the intent state. Returns whether the
    /// swap applied; `false` means another worker got there first.
    async fn update_intent_state(
        &self,
        intent_id: &str,
        from: RefundState,
        to: RefundState,
        error: Option<&str>,
    ) -> Result<bool, EscrowError>;

    async fn increment_intent_retry(&self, intent_id: &str) -> Result<(), EscrowError>;

    /// All non-terminal intents, for operator resume.
    async fn pending_intents(&self) -> Result<Vec<RefundIntent>, EscrowError>;

    // --- convenience ---

    /// When the transaction closed: creation time of the most recent
    /// audit entry carrying a closed-family status, if any.
    async fn closed_at(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<DateTime<Utc>>, EscrowError> {
        let states = self.states_for(transaction_id, milestone_id).await?;
        Ok(states
            .into_iter()
            .rev()
            .find(|s| !s.status.is_open())
            .map(|s| s.created_at))
    }

    /// Load a transaction, failing with `NotFound` if absent.
    async fn require_transaction(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Transaction, EscrowError> {
        self.transaction(transaction_id, milestone_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("transaction"))
    }

    /// Resolve the party holding `role`, failing with `NotFound` if the
    /// role is vacant.
    async fn require_party(
        &self,
        parties_id: &str,
        role: PartyRole,
    ) -> Result<Party, EscrowError> {
        self.party_by_role(parties_id, role)
            .await?
            .ok_or_else(|| EscrowError::not_found(role.as_str()))
    }
}
