//! Reconciliation scheduler
//!
//! Five recurring jobs that scan the store and push transactions through
//! transitions that would otherwise require a live actor. Each job is an
//! indefinitely-looping task spawned once at process start; there is no
//! cancellation signal, the jobs die with the process.
//!
//! All five share one mutex: a single job body executes system-wide at
//! any instant, so overlapping ticks serialize instead of racing on the
//! same overdue rows. Within a run, records are processed one at a time;
//! a per-record failure is logged and the batch continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clients::{BusinessClient, PaymentsClient};
use crate::config::SchedulerConfig;
use crate::error::EscrowError;
use crate::lifecycle::LifecycleService;
use crate::models::{PartyRole, PartyStatus, SYSTEM_ACCOUNT, Transaction};
use crate::status::TransactionStatus;
use crate::store::TransactionStore;

/// Activity text written when the update-status job picks a row up.
pub const DISBURSEMENT_PROCESSING: &str = "disbursement processing";
/// Activity text written after every recipient transfer was issued.
pub const DISBURSEMENT_COMPLETE: &str = "disbursement complete";

/// The five reconciliation jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    InspectionPeriod,
    AutoMarkDelivered,
    AutoClose,
    TransactionClose,
    UpdateStatus,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::InspectionPeriod => "inspection-period",
            Job::AutoMarkDelivered => "auto-mark",
            Job::AutoClose => "auto-close",
            Job::TransactionClose => "transaction-close",
            Job::UpdateStatus => "update-status",
        }
    }
}

pub struct Scheduler {
    service: Arc<LifecycleService>,
    store: Arc<dyn TransactionStore>,
    payments: Arc<dyn PaymentsClient>,
    business: Arc<dyn BusinessClient>,
    lock: Mutex<()>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        service: Arc<LifecycleService>,
        payments: Arc<dyn PaymentsClient>,
        business: Arc<dyn BusinessClient>,
        config: SchedulerConfig,
    ) -> Self {
        let store = service.store().clone();
        Self {
            service,
            store,
            payments,
            business,
            lock: Mutex::new(()),
            config,
        }
    }

    /// Spawn all five job loops. Returns the handles; they never resolve
    /// short of process shutdown.
    pub fn spawn_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let jobs = [
            (Job::InspectionPeriod, self.config.inspection_interval_secs),
            (Job::AutoMarkDelivered, self.config.auto_mark_interval_secs),
            (Job::AutoClose, self.config.auto_close_interval_secs),
            (
                Job::TransactionClose,
                self.config.transaction_close_interval_secs,
            ),
            (Job::UpdateStatus, self.config.update_status_interval_secs),
        ];

        jobs.into_iter()
            .map(|(job, secs)| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move {
                    let interval = Duration::from_secs(secs);
                    info!(job = job.name(), ?interval, "reconciliation job started");
                    loop {
                        sleep(interval).await;
                        match scheduler.tick(job).await {
                            Ok(0) => {}
                            Ok(processed) => {
                                info!(job = job.name(), processed, "reconciliation tick")
                            }
                            Err(e) => {
                                error!(job = job.name(), error = %e, "reconciliation tick failed")
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Run one tick of `job` under the shared lock. Returns how many
    /// records were transitioned.
    pub async fn tick(&self, job: Job) -> Result<usize, EscrowError> {
        let _guard = self.lock.lock().await;
        match job {
            Job::InspectionPeriod => self.run_inspection_once().await,
            Job::AutoMarkDelivered => self.run_auto_mark_once().await,
            Job::AutoClose => self.run_auto_close_once().await,
            Job::TransactionClose => self.run_transaction_close_once().await,
            Job::UpdateStatus => self.run_update_status_once().await,
        }
    }

    /// Delivered transactions whose inspection period has lapsed and
    /// whose payment is confirmed get satisfied on behalf of the buyer.
    async fn run_inspection_once(&self) -> Result<usize, EscrowError> {
        let now = Utc::now();
        let delivered = self.store.list_by_status(TransactionStatus::Delivered).await?;
        let mut processed = 0;

        for tx in delivered {
            if !tx.inspection_period.is_past(now) {
                continue;
            }
            match self.service.is_paid(&tx.transaction_id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "payment lookup failed, record skipped");
                    continue;
                }
            }

            let buyer = match self.store.party_by_role(&tx.parties_id, PartyRole::Buyer).await {
                Ok(Some(buyer)) => buyer,
                Ok(None) => {
                    warn!(transaction_id = %tx.transaction_id, "no buyer party, record skipped");
                    continue;
                }
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "party lookup failed, record skipped");
                    continue;
                }
            };

            match self
                .service
                .satisfied(&tx.transaction_id, &tx.milestone_id, buyer.account_id)
                .await
            {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "auto-satisfy failed, record skipped")
                }
            }
        }
        Ok(processed)
    }

    /// Overdue, not-yet-delivered transactions of businesses with the
    /// auto-transition setting enabled get marked delivered.
    async fn run_auto_mark_once(&self) -> Result<usize, EscrowError> {
        let now = Utc::now();
        let rows = self.store.list_not_delivered().await?;
        let mut processed = 0;
        // Profile answers are cached per run, one lookup per business
        let mut auto_enabled: HashMap<String, bool> = HashMap::new();

        for tx in rows {
            if !tx.due_date.is_past(now) {
                continue;
            }

            let enabled = match auto_enabled.get(&tx.business_id) {
                Some(enabled) => *enabled,
                None => {
                    let enabled = match self.business.get_profile(&tx.business_id).await {
                        Ok(profile) => profile.auto_transaction_status,
                        Err(e) if e.is_not_found() => false,
                        Err(e) => {
                            warn!(business_id = %tx.business_id, error = %e, "profile lookup failed, record skipped");
                            continue;
                        }
                    };
                    auto_enabled.insert(tx.business_id.clone(), enabled);
                    enabled
                }
            };
            if !enabled {
                continue;
            }

            match self
                .service
                .deliver(&tx.transaction_id, &tx.milestone_id, SYSTEM_ACCOUNT)
                .await
            {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "auto-deliver failed, record skipped")
                }
            }
        }
        Ok(processed)
    }

    /// Disbursement-complete transactions get their closing audit entry
    /// and move to `Closed`.
    async fn run_auto_close_once(&self) -> Result<usize, EscrowError> {
        let rows = self
            .store
            .list_by_status(TransactionStatus::ClosedDisbursementComplete)
            .await?;
        let mut processed = 0;

        for tx in rows {
            match self
                .service
                .transition(&tx, TransactionStatus::Closed, SYSTEM_ACCOUNT)
                .await
            {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "auto-close failed, record skipped")
                }
            }
        }
        Ok(processed)
    }

    /// Primary reconciliation: overdue, still-open transactions are
    /// closed by the first matching rule. Batches of `batch_size`.
    async fn run_transaction_close_once(&self) -> Result<usize, EscrowError> {
        let now = Utc::now();
        let batch = self
            .store
            .list_open_overdue(now, self.config.batch_size)
            .await?;
        let mut processed = 0;

        for tx in batch {
            match self.close_one(&tx).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "close failed, record skipped")
                }
            }
        }
        Ok(processed)
    }

    /// Apply the ordered closing rules to one overdue transaction. Only
    /// the first matching rule fires.
    async fn close_one(&self, tx: &Transaction) -> Result<bool, EscrowError> {
        // 1. A party never accepted: close, no refund
        let parties = self.store.parties(&tx.parties_id).await?;
        if parties.iter().any(|p| p.status != PartyStatus::Accepted) {
            self.service
                .transition(tx, TransactionStatus::Closed, SYSTEM_ACCOUNT)
                .await?;
            return Ok(true);
        }

        // 2. A payment record decides funded vs not funded
        match self.payments.list_payment(&tx.transaction_id).await {
            Ok(payment) if payment.is_paid => {
                self.refund_and_close(tx).await?;
                return Ok(true);
            }
            Ok(_) => {
                self.service
                    .transition(tx, TransactionStatus::ClosedNotFunded, SYSTEM_ACCOUNT)
                    .await?;
                return Ok(true);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        // 3. Delivered and past due
        if tx.status == TransactionStatus::Delivered {
            self.refund_and_close(tx).await?;
            return Ok(true);
        }

        // 4. Refundable in-flight statuses
        if matches!(
            tx.status,
            TransactionStatus::DeliveredRejected
                | TransactionStatus::InProgress
                | TransactionStatus::AcceptedFunded
                | TransactionStatus::SentRejected
        ) {
            self.refund_and_close(tx).await?;
            return Ok(true);
        }

        // 5. Never funded: close, no refund
        if matches!(
            tx.status,
            TransactionStatus::AcceptedNotFunded | TransactionStatus::Draft
        ) {
            self.service
                .transition(tx, TransactionStatus::Closed, SYSTEM_ACCOUNT)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn refund_and_close(&self, tx: &Transaction) -> Result<(), EscrowError> {
        self.service
            .refunds()
            .refund(tx, tx.amount_paid, &tx.currency)
            .await?;
        self.service
            .transition(tx, TransactionStatus::ClosedRefunded, SYSTEM_ACCOUNT)
            .await
    }

    /// Disbursement-pending transactions: the only path that moves money
    /// to recipients. Batches of `batch_size`.
    async fn run_update_status_once(&self) -> Result<usize, EscrowError> {
        let rows = self
            .store
            .list_by_status(TransactionStatus::ClosedDisbursementPending)
            .await?;
        let mut processed = 0;

        for tx in rows.into_iter().take(self.config.batch_size) {
            match self.disburse_one(&tx).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "disbursement deferred, record skipped")
                }
            }
        }
        Ok(processed)
    }

    async fn disburse_one(&self, tx: &Transaction) -> Result<(), EscrowError> {
        self.store
            .append_activity(&crate::models::ActivityLog::new(
                &tx.transaction_id,
                DISBURSEMENT_PROCESSING,
            ))
            .await?;

        // A failed payment lookup defers the row to the next tick with
        // the processing entry already written and the status untouched
        self.payments.list_payment(&tx.transaction_id).await?;

        self.service.refunds().disburse(tx).await?;

        self.store
            .append_activity(&crate::models::ActivityLog::new(
                &tx.transaction_id,
                DISBURSEMENT_COMPLETE,
            ))
            .await?;
        self.service
            .transition(
                tx,
                TransactionStatus::ClosedDisbursementComplete,
                SYSTEM_ACCOUNT,
            )
            .await
    }
}
