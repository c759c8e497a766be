//! In-memory store backend
//!
//! Keeps every table in maps behind a single `RwLock`. Used by the test
//! suite and by local wiring when no Postgres URL is configured.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::EscrowError;
use crate::models::{
    ActivityLog, Broker, Dispute, DueDateExtensionRequest, EpochSeconds, Party, PartyRole,
    StateEntry, Transaction,
};
use crate::refund::{RefundIntent, RefundState};
use crate::status::TransactionStatus;

use super::TransactionStore;

#[derive(Default)]
struct Inner {
    /// Keyed by `(transaction_id, milestone_id)`; BTreeMap keeps scan
    /// order deterministic.
    transactions: BTreeMap<(String, String), Transaction>,
    states: Vec<StateEntry>,
    parties: HashMap<String, Vec<Party>>,
    disputes: HashMap<String, Dispute>,
    brokers: HashMap<String, Broker>,
    extensions: HashMap<(String, String), Vec<DueDateExtensionRequest>>,
    activities: HashMap<String, Vec<ActivityLog>>,
    intents: HashMap<String, RefundIntent>,
    /// Intent ids in creation order, so "latest for pair" is well defined
    /// even when timestamps tie.
    intent_order: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn create_transaction(&self, tx: &Transaction) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        let key = (tx.transaction_id.clone(), tx.milestone_id.clone());
        if inner.transactions.contains_key(&key) {
            return Err(EscrowError::Store(format!(
                "transaction {}/{} already exists",
                tx.transaction_id, tx.milestone_id
            )));
        }
        inner.transactions.insert(key, tx.clone());
        Ok(())
    }

    async fn transaction(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<Transaction>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&(transaction_id.to_string(), milestone_id.to_string()))
            .cloned())
    }

    async fn milestones(&self, transaction_id: &str) -> Result<Vec<Transaction>, EscrowError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|tx| tx.transaction_id == transaction_id)
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.milestone_index);
        Ok(rows)
    }

    async fn update_status(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        status: TransactionStatus,
    ) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&(transaction_id.to_string(), milestone_id.to_string()))
            .ok_or_else(|| EscrowError::not_found("transaction"))?;
        tx.status = status;
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn update_schedule(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        due_date: EpochSeconds,
        inspection_period: EpochSeconds,
    ) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .get_mut(&(transaction_id.to_string(), milestone_id.to_string()))
            .ok_or_else(|| EscrowError::not_found("transaction"))?;
        tx.due_date = due_date;
        tx.inspection_period = inspection_period;
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .transactions
            .retain(|(tx_id, _), _| tx_id != transaction_id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect())
    }

    async fn list_not_delivered(&self) -> Result<Vec<Transaction>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.status != TransactionStatus::Delivered)
            .cloned()
            .collect())
    }

    async fn list_open_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .filter(|tx| tx.status.is_open() && tx.due_date.is_past(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_state(&self, entry: &StateEntry) -> Result<(), EscrowError> {
        self.inner.write().await.states.push(entry.clone());
        Ok(())
    }

    async fn states_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<StateEntry>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .states
            .iter()
            .filter(|s| s.transaction_id == transaction_id && s.milestone_id == milestone_id)
            .cloned()
            .collect())
    }

    async fn latest_state(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<StateEntry>, EscrowError> {
        Ok(self
            .states_for(transaction_id, milestone_id)
            .await?
            .into_iter()
            .last())
    }

    async fn upsert_party(&self, party: &Party) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        let entries = inner
            .parties
            .entry(party.parties_id.clone())
            .or_default();
        match entries.iter_mut().find(|p| p.role == party.role) {
            Some(existing) => *existing = party.clone(),
            None => entries.push(party.clone()),
        }
        Ok(())
    }

    async fn party_by_role(
        &self,
        parties_id: &str,
        role: PartyRole,
    ) -> Result<Option<Party>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .parties
            .get(parties_id)
            .and_then(|entries| entries.iter().find(|p| p.role == role).cloned()))
    }

    async fn parties(&self, parties_id: &str) -> Result<Vec<Party>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner.parties.get(parties_id).cloned().unwrap_or_default())
    }

    async fn create_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .disputes
            .insert(dispute.transaction_id.clone(), dispute.clone());
        Ok(())
    }

    async fn dispute(&self, transaction_id: &str) -> Result<Option<Dispute>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner.disputes.get(transaction_id).cloned())
    }

    async fn update_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        if !inner.disputes.contains_key(&dispute.transaction_id) {
            return Err(EscrowError::not_found("dispute"));
        }
        inner
            .disputes
            .insert(dispute.transaction_id.clone(), dispute.clone());
        Ok(())
    }

    async fn upsert_broker(&self, broker: &Broker) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .brokers
            .insert(broker.transaction_id.clone(), broker.clone());
        Ok(())
    }

    async fn broker(&self, transaction_id: &str) -> Result<Option<Broker>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner.brokers.get(transaction_id).cloned())
    }

    async fn create_extension_request(
        &self,
        request: &DueDateExtensionRequest,
    ) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .extensions
            .entry((request.transaction_id.clone(), request.milestone_id.clone()))
            .or_default()
            .push(request.clone());
        Ok(())
    }

    async fn extension_requests(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<DueDateExtensionRequest>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .extensions
            .get(&(transaction_id.to_string(), milestone_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn append_activity(&self, log: &ActivityLog) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .activities
            .entry(log.transaction_id.clone())
            .or_default()
            .push(log.clone());
        Ok(())
    }

    async fn activities_for(&self, transaction_id: &str) -> Result<Vec<ActivityLog>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .activities
            .get(transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_refund_intent(&self, intent: &RefundIntent) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        inner
            .intents
            .insert(intent.intent_id.clone(), intent.clone());
        inner.intent_order.push(intent.intent_id.clone());
        Ok(())
    }

    async fn refund_intent(&self, intent_id: &str) -> Result<Option<RefundIntent>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner.intents.get(intent_id).cloned())
    }

    async fn refund_intent_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<RefundIntent>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .intent_order
            .iter()
            .rev()
            .filter_map(|id| inner.intents.get(id))
            .find(|i| i.transaction_id == transaction_id && i.milestone_id == milestone_id)
            .cloned())
    }

    async fn update_intent_state(
        &self,
        intent_id: &str,
        from: RefundState,
        to: RefundState,
        error: Option<&str>,
    ) -> Result<bool, EscrowError> {
        let mut inner = self.inner.write().await;
        let intent = inner
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| EscrowError::not_found("refund intent"))?;
        if intent.state != from {
            return Ok(false);
        }
        intent.state = to;
        intent.error = error.map(str::to_string);
        intent.updated_at = Utc::now();
        Ok(true)
    }

    async fn increment_intent_retry(&self, intent_id: &str) -> Result<(), EscrowError> {
        let mut inner = self.inner.write().await;
        let intent = inner
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| EscrowError::not_found("refund intent"))?;
        intent.retry_count += 1;
        intent.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_intents(&self) -> Result<Vec<RefundIntent>, EscrowError> {
        let inner = self.inner.read().await;
        Ok(inner
            .intent_order
            .iter()
            .filter_map(|id| inner.intents.get(id))
            .filter(|i| !i.state.is_terminal())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;
    use rust_decimal_macros::dec;

    fn sample_tx(tx_id: &str, ms_id: &str, status: TransactionStatus) -> Transaction {
        let mut tx = Transaction::new(
            tx_id,
            ms_id,
            "p-1",
            "biz-1",
            "Sample",
            TransactionKind::OneOff,
            dec!(250),
            "NGN",
        );
        tx.status = status;
        tx
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = MemoryStore::new();
        let tx = sample_tx("tx-1", "ms-1", TransactionStatus::Draft);
        store.create_transaction(&tx).await.unwrap();
        assert!(store.transaction("tx-1", "ms-1").await.unwrap().is_some());
        assert!(store.transaction("tx-1", "ms-2").await.unwrap().is_none());
        assert!(store.create_transaction(&tx).await.is_err());
    }

    #[tokio::test]
    async fn test_milestones_sorted_by_index() {
        let store = MemoryStore::new();
        let mut second = sample_tx("tx-1", "ms-2", TransactionStatus::Draft);
        second.milestone_index = 1;
        store.create_transaction(&second).await.unwrap();
        store
            .create_transaction(&sample_tx("tx-1", "ms-1", TransactionStatus::Draft))
            .await
            .unwrap();
        let rows = store.milestones("tx-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].milestone_id, "ms-1");
    }

    #[tokio::test]
    async fn test_open_overdue_scan() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let past = EpochSeconds::from_secs(now.timestamp() - 3600);

        let mut overdue = sample_tx("tx-1", "ms-1", TransactionStatus::AcceptedFunded);
        overdue.due_date = past;
        let mut closed = sample_tx("tx-2", "ms-1", TransactionStatus::Closed);
        closed.due_date = past;
        let not_due = sample_tx("tx-3", "ms-1", TransactionStatus::AcceptedFunded);

        for tx in [&overdue, &closed, &not_due] {
            store.create_transaction(tx).await.unwrap();
        }

        let rows = store.list_open_overdue(now, 20).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, "tx-1");

        assert!(store.list_open_overdue(now, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_intent_cas() {
        let store = MemoryStore::new();
        let intent = RefundIntent::new("tx-1", "ms-1", 7, dec!(10), "NGN");
        store.create_refund_intent(&intent).await.unwrap();

        assert!(store
            .update_intent_state(&intent.intent_id, RefundState::Init, RefundState::DebitPending, None)
            .await
            .unwrap());
        // Stale CAS must not apply
        assert!(!store
            .update_intent_state(&intent.intent_id, RefundState::Init, RefundState::Failed, None)
            .await
            .unwrap());
        let loaded = store.refund_intent(&intent.intent_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RefundState::DebitPending);

        assert_eq!(store.pending_intents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_latest_state() {
        let store = MemoryStore::new();
        assert!(store.latest_state("tx-1", "ms-1").await.unwrap().is_none());
        store
            .append_state(&StateEntry::new(1, "tx-1", "ms-1", TransactionStatus::Draft))
            .await
            .unwrap();
        store
            .append_state(&StateEntry::new(1, "tx-1", "ms-1", TransactionStatus::Delivered))
            .await
            .unwrap();
        let latest = store.latest_state("tx-1", "ms-1").await.unwrap().unwrap();
        assert_eq!(latest.status, TransactionStatus::Delivered);
    }

    #[tokio::test]
    async fn test_broker_terms_acceptance_is_independent() {
        let store = MemoryStore::new();
        let mut broker = crate::models::Broker {
            transaction_id: "tx-1".to_string(),
            broker_charge: dec!(25),
            buyer_accepted: true,
            seller_accepted: false,
            created_at: Utc::now(),
        };
        store.upsert_broker(&broker).await.unwrap();

        broker.seller_accepted = true;
        store.upsert_broker(&broker).await.unwrap();

        let loaded = store.broker("tx-1").await.unwrap().unwrap();
        assert!(loaded.buyer_accepted);
        assert!(loaded.seller_accepted);
        assert_eq!(loaded.broker_charge, dec!(25));
        assert!(store.broker("tx-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispute_updated_in_place() {
        let store = MemoryStore::new();
        let mut dispute = crate::models::Dispute::open("tx-1", 7, "not as described");
        assert!(store.update_dispute(&dispute).await.is_err());

        store.create_dispute(&dispute).await.unwrap();
        dispute.status = "resolved".to_string();
        dispute.decision = "refund the buyer".to_string();
        store.update_dispute(&dispute).await.unwrap();

        let loaded = store.dispute("tx-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, "resolved");
        assert_eq!(loaded.decision, "refund the buyer");
    }

    #[tokio::test]
    async fn test_closed_at_uses_latest_closed_entry() {
        let store = MemoryStore::new();
        store
            .append_state(&StateEntry::new(1, "tx-1", "ms-1", TransactionStatus::Delivered))
            .await
            .unwrap();
        assert!(store.closed_at("tx-1", "ms-1").await.unwrap().is_none());
        store
            .append_state(&StateEntry::new(1, "tx-1", "ms-1", TransactionStatus::Closed))
            .await
            .unwrap();
        assert!(store.closed_at("tx-1", "ms-1").await.unwrap().is_some());
    }
}
