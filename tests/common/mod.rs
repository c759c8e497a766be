//! Shared test fixtures: in-memory store, recording mocks and a wired
//! lifecycle service.

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal_macros::dec;

use escrowd::clients::{MockBusiness, MockNotifications, MockPayments, MockWallet};
use escrowd::config::SchedulerConfig;
use escrowd::lifecycle::LifecycleService;
use escrowd::models::{AccountId, Party, PartyRole, Transaction, TransactionKind};
use escrowd::scheduler::Scheduler;
use escrowd::status::TransactionStatus;
use escrowd::store::{MemoryStore, TransactionStore};

pub const BUYER: AccountId = 101;
pub const SELLER: AccountId = 202;
pub const STRANGER: AccountId = 999;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub payments: Arc<MockPayments>,
    pub wallet: Arc<MockWallet>,
    pub notifications: Arc<MockNotifications>,
    pub business: Arc<MockBusiness>,
    pub service: Arc<LifecycleService>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let payments = Arc::new(MockPayments::new());
        let wallet = Arc::new(MockWallet::new());
        let notifications = Arc::new(MockNotifications::new());
        let business = Arc::new(MockBusiness::new());
        let service = Arc::new(LifecycleService::new(
            store.clone(),
            payments.clone(),
            wallet.clone(),
            notifications.clone(),
            business.clone(),
        ));
        Self {
            store,
            payments,
            wallet,
            notifications,
            business,
            service,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler_with(SchedulerConfig::default())
    }

    pub fn scheduler_with(&self, config: SchedulerConfig) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            self.service.clone(),
            self.payments.clone(),
            self.business.clone(),
            config,
        ))
    }

    /// Seed a one-off transaction with accepted buyer and seller parties.
    pub async fn seed_transaction(&self, tx_id: &str, status: TransactionStatus) -> Transaction {
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
        self.store.create_transaction(&tx).await.unwrap();
        self.store
            .upsert_party(
                &Party::new(&tx.parties_id, BUYER, PartyRole::Buyer)
                    .accepted()
                    .with_capability("view"),
            )
            .await
            .unwrap();
        self.store
            .upsert_party(
                &Party::new(&tx.parties_id, SELLER, PartyRole::Seller)
                    .accepted()
                    .with_capability("view"),
            )
            .await
            .unwrap();
        tx
    }

    /// Seed a pre-built transaction row plus accepted buyer/seller
    /// parties for its `parties_id`.
    pub async fn seed_prepared(&self, tx: &Transaction) {
        self.store.create_transaction(tx).await.unwrap();
        self.store
            .upsert_party(&Party::new(&tx.parties_id, BUYER, PartyRole::Buyer).accepted())
            .await
            .unwrap();
        self.store
            .upsert_party(&Party::new(&tx.parties_id, SELLER, PartyRole::Seller).accepted())
            .await
            .unwrap();
    }

    pub async fn status_of(&self, tx: &Transaction) -> TransactionStatus {
        self.store
            .transaction(&tx.transaction_id, &tx.milestone_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    pub async fn audit_statuses(&self, tx: &Transaction) -> Vec<TransactionStatus> {
        self.store
            .states_for(&tx.transaction_id, &tx.milestone_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.status)
            .collect()
    }

    pub async fn activity_texts(&self, tx: &Transaction) -> Vec<String> {
        self.store
            .activities_for(&tx.transaction_id)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.description)
            .collect()
    }
}
