//! PostgreSQL store backend
//!
//! Persists the label form of statuses and the decimal-string form of the
//! three date fields. Date comparisons are done in Rust after re-parsing,
//! never in SQL, because the stored form is text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::error::EscrowError;
use crate::models::{
    AccountId, ActivityLog, Broker, Dispute, DueDateExtensionRequest, EpochSeconds, Party,
    PartyRole, PartyStatus, StateEntry, Transaction, TransactionKind,
};
use crate::refund::{RefundIntent, RefundState};
use crate::status::{ALL_STATUSES, TransactionStatus};

use super::TransactionStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, EscrowError> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), EscrowError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS transactions_tb (
                transaction_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                parties_id TEXT NOT NULL,
                business_id TEXT NOT NULL,
                title TEXT NOT NULL,
                milestone_title TEXT NOT NULL DEFAULT '',
                milestone_index INT NOT NULL DEFAULT 0,
                grand_total NUMERIC NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                amount_paid NUMERIC NOT NULL,
                escrow_charge NUMERIC NOT NULL,
                currency TEXT NOT NULL,
                recipients TEXT NOT NULL DEFAULT '[]',
                due_date TEXT NOT NULL DEFAULT '0',
                inspection_period TEXT NOT NULL DEFAULT '0',
                grace_period TEXT NOT NULL DEFAULT '0',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (transaction_id, milestone_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS transaction_states_tb (
                id BIGSERIAL PRIMARY KEY,
                account_id BIGINT NOT NULL,
                transaction_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS transaction_parties_tb (
                parties_id TEXT NOT NULL,
                account_id BIGINT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (parties_id, role)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS transaction_disputes_tb (
                transaction_id TEXT PRIMARY KEY,
                account_id BIGINT NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL,
                decision TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS transaction_brokers_tb (
                transaction_id TEXT PRIMARY KEY,
                broker_charge NUMERIC NOT NULL,
                buyer_accepted BOOLEAN NOT NULL DEFAULT FALSE,
                seller_accepted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS due_date_extensions_tb (
                request_id TEXT PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                account_id BIGINT NOT NULL,
                due_date TEXT NOT NULL,
                inspection_period TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS activity_logs_tb (
                id BIGSERIAL PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS refund_intents_tb (
                intent_id TEXT PRIMARY KEY,
                transaction_id TEXT NOT NULL,
                milestone_id TEXT NOT NULL,
                account_id BIGINT NOT NULL,
                amount NUMERIC NOT NULL,
                currency TEXT NOT NULL,
                state TEXT NOT NULL,
                error TEXT,
                retry_count INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_epoch(raw: &str, column: &str) -> Result<EpochSeconds, EscrowError> {
    raw.parse()
        .map_err(|_| EscrowError::Store(format!("corrupt {column} value: {raw:?}")))
}

fn map_transaction(row: &PgRow) -> Result<Transaction, EscrowError> {
    let status: String = row.get("status");
    let kind: String = row.get("kind");
    Ok(Transaction {
        transaction_id: row.get("transaction_id"),
        milestone_id: row.get("milestone_id"),
        parties_id: row.get("parties_id"),
        business_id: row.get("business_id"),
        title: row.get("title"),
        milestone_title: row.get("milestone_title"),
        milestone_index: row.get::<i32, _>("milestone_index") as u32,
        grand_total: row.get("grand_total"),
        kind: kind
            .parse::<TransactionKind>()
            .map_err(|_| EscrowError::Store(format!("corrupt kind value: {kind:?}")))?,
        status: status
            .parse()
            .unwrap_or(TransactionStatus::Draft),
        amount_paid: row.get("amount_paid"),
        escrow_charge: row.get("escrow_charge"),
        currency: row.get("currency"),
        recipients: row.get("recipients"),
        due_date: parse_epoch(row.get::<String, _>("due_date").as_str(), "due_date")?,
        inspection_period: parse_epoch(
            row.get::<String, _>("inspection_period").as_str(),
            "inspection_period",
        )?,
        grace_period: parse_epoch(row.get::<String, _>("grace_period").as_str(), "grace_period")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_state(row: &PgRow) -> StateEntry {
    let status: String = row.get("status");
    StateEntry {
        account_id: row.get::<i64, _>("account_id") as AccountId,
        transaction_id: row.get("transaction_id"),
        milestone_id: row.get("milestone_id"),
        status: status.parse().unwrap_or(TransactionStatus::Draft),
        created_at: row.get("created_at"),
    }
}

fn map_party(row: &PgRow) -> Result<Party, EscrowError> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let capabilities: String = row.get("capabilities");
    Ok(Party {
        parties_id: row.get("parties_id"),
        account_id: row.get::<i64, _>("account_id") as AccountId,
        role: role
            .parse::<PartyRole>()
            .map_err(|_| EscrowError::Store(format!("corrupt party role: {role:?}")))?,
        status: match status.as_str() {
            "accepted" => PartyStatus::Accepted,
            "rejected" => PartyStatus::Rejected,
            _ => PartyStatus::Created,
        },
        capabilities: serde_json::from_str(&capabilities)?,
    })
}

fn map_intent(row: &PgRow) -> Result<RefundIntent, EscrowError> {
    let state: String = row.get("state");
    Ok(RefundIntent {
        intent_id: row.get("intent_id"),
        transaction_id: row.get("transaction_id"),
        milestone_id: row.get("milestone_id"),
        account_id: row.get::<i64, _>("account_id") as AccountId,
        amount: row.get("amount"),
        currency: row.get("currency"),
        state: state
            .parse::<RefundState>()
            .map_err(|_| EscrowError::Store(format!("corrupt refund state: {state:?}")))?,
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn closed_labels() -> Vec<String> {
    ALL_STATUSES
        .iter()
        .filter(|s| !s.is_open())
        .map(|s| s.label().to_string())
        .collect()
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn create_transaction(&self, tx: &Transaction) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO transactions_tb
               (transaction_id, milestone_id, parties_id, business_id, title, milestone_title,
                milestone_index, grand_total, kind, status, amount_paid, escrow_charge, currency,
                recipients, due_date, inspection_period, grace_period, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"#,
        )
        .bind(&tx.transaction_id)
        .bind(&tx.milestone_id)
        .bind(&tx.parties_id)
        .bind(&tx.business_id)
        .bind(&tx.title)
        .bind(&tx.milestone_title)
        .bind(tx.milestone_index as i32)
        .bind(tx.grand_total)
        .bind(tx.kind.as_str())
        .bind(tx.status.label())
        .bind(tx.amount_paid)
        .bind(tx.escrow_charge)
        .bind(&tx.currency)
        .bind(&tx.recipients)
        .bind(tx.due_date.to_string())
        .bind(tx.inspection_period.to_string())
        .bind(tx.grace_period.to_string())
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transaction(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<Transaction>, EscrowError> {
        let row = sqlx::query(
            r#"SELECT * FROM transactions_tb
               WHERE transaction_id = $1 AND milestone_id = $2"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_transaction).transpose()
    }

    async fn milestones(&self, transaction_id: &str) -> Result<Vec<Transaction>, EscrowError> {
        let rows = sqlx::query(
            r#"SELECT * FROM transactions_tb
               WHERE transaction_id = $1 ORDER BY milestone_index"#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_transaction).collect()
    }

    async fn update_status(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        status: TransactionStatus,
    ) -> Result<(), EscrowError> {
        let result = sqlx::query(
            r#"UPDATE transactions_tb SET status = $3, updated_at = NOW()
               WHERE transaction_id = $1 AND milestone_id = $2"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .bind(status.label())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EscrowError::not_found("transaction"));
        }
        Ok(())
    }

    async fn update_schedule(
        &self,
        transaction_id: &str,
        milestone_id: &str,
        due_date: EpochSeconds,
        inspection_period: EpochSeconds,
    ) -> Result<(), EscrowError> {
        let result = sqlx::query(
            r#"UPDATE transactions_tb
               SET due_date = $3, inspection_period = $4, updated_at = NOW()
               WHERE transaction_id = $1 AND milestone_id = $2"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .bind(due_date.to_string())
        .bind(inspection_period.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EscrowError::not_found("transaction"));
        }
        Ok(())
    }

    async fn delete_transaction(&self, transaction_id: &str) -> Result<(), EscrowError> {
        sqlx::query("DELETE FROM transactions_tb WHERE transaction_id = $1")
            .bind(transaction_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, EscrowError> {
        let rows = sqlx::query("SELECT * FROM transactions_tb WHERE status = $1")
            .bind(status.label())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_transaction).collect()
    }

    async fn list_not_delivered(&self) -> Result<Vec<Transaction>, EscrowError> {
        let rows = sqlx::query("SELECT * FROM transactions_tb WHERE status <> $1")
            .bind(TransactionStatus::Delivered.label())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_transaction).collect()
    }

    async fn list_open_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, EscrowError> {
        // Status is filtered in SQL; the due date is text and must be
        // re-parsed, so that comparison happens here.
        let rows = sqlx::query(
            r#"SELECT * FROM transactions_tb WHERE status <> ALL($1)
               ORDER BY transaction_id, milestone_id"#,
        )
        .bind(closed_labels())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::new();
        for row in &rows {
            let tx = map_transaction(row)?;
            if tx.due_date.is_past(now) {
                out.push(tx);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn append_state(&self, entry: &StateEntry) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO transaction_states_tb
               (account_id, transaction_id, milestone_id, status, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(entry.account_id as i64)
        .bind(&entry.transaction_id)
        .bind(&entry.milestone_id)
        .bind(entry.status.label())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn states_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<StateEntry>, EscrowError> {
        let rows = sqlx::query(
            r#"SELECT * FROM transaction_states_tb
               WHERE transaction_id = $1 AND milestone_id = $2 ORDER BY id"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_state).collect())
    }

    async fn latest_state(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<StateEntry>, EscrowError> {
        let row = sqlx::query(
            r#"SELECT * FROM transaction_states_tb
               WHERE transaction_id = $1 AND milestone_id = $2
               ORDER BY id DESC LIMIT 1"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_state))
    }

    async fn upsert_party(&self, party: &Party) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO transaction_parties_tb
               (parties_id, account_id, role, status, capabilities)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (parties_id, role) DO UPDATE
               SET account_id = EXCLUDED.account_id,
                   status = EXCLUDED.status,
                   capabilities = EXCLUDED.capabilities"#,
        )
        .bind(&party.parties_id)
        .bind(party.account_id as i64)
        .bind(party.role.as_str())
        .bind(party.status.as_str())
        .bind(serde_json::to_string(&party.capabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn party_by_role(
        &self,
        parties_id: &str,
        role: PartyRole,
    ) -> Result<Option<Party>, EscrowError> {
        let row = sqlx::query(
            "SELECT * FROM transaction_parties_tb WHERE parties_id = $1 AND role = $2",
        )
        .bind(parties_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_party).transpose()
    }

    async fn parties(&self, parties_id: &str) -> Result<Vec<Party>, EscrowError> {
        let rows = sqlx::query("SELECT * FROM transaction_parties_tb WHERE parties_id = $1")
            .bind(parties_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_party).collect()
    }

    async fn create_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO transaction_disputes_tb
               (transaction_id, account_id, reason, status, decision, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&dispute.transaction_id)
        .bind(dispute.account_id as i64)
        .bind(&dispute.reason)
        .bind(&dispute.status)
        .bind(&dispute.decision)
        .bind(dispute.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dispute(&self, transaction_id: &str) -> Result<Option<Dispute>, EscrowError> {
        let row = sqlx::query("SELECT * FROM transaction_disputes_tb WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Dispute {
            transaction_id: r.get("transaction_id"),
            account_id: r.get::<i64, _>("account_id") as AccountId,
            reason: r.get("reason"),
            status: r.get("status"),
            decision: r.get("decision"),
            created_at: r.get("created_at"),
        }))
    }

    async fn update_dispute(&self, dispute: &Dispute) -> Result<(), EscrowError> {
        let result = sqlx::query(
            r#"UPDATE transaction_disputes_tb
               SET reason = $2, status = $3, decision = $4
               WHERE transaction_id = $1"#,
        )
        .bind(&dispute.transaction_id)
        .bind(&dispute.reason)
        .bind(&dispute.status)
        .bind(&dispute.decision)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EscrowError::not_found("dispute"));
        }
        Ok(())
    }

    async fn upsert_broker(&self, broker: &Broker) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO transaction_brokers_tb
               (transaction_id, broker_charge, buyer_accepted, seller_accepted, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (transaction_id) DO UPDATE
               SET broker_charge = EXCLUDED.broker_charge,
                   buyer_accepted = EXCLUDED.buyer_accepted,
                   seller_accepted = EXCLUDED.seller_accepted"#,
        )
        .bind(&broker.transaction_id)
        .bind(broker.broker_charge)
        .bind(broker.buyer_accepted)
        .bind(broker.seller_accepted)
        .bind(broker.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn broker(&self, transaction_id: &str) -> Result<Option<Broker>, EscrowError> {
        let row = sqlx::query("SELECT * FROM transaction_brokers_tb WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Broker {
            transaction_id: r.get("transaction_id"),
            broker_charge: r.get("broker_charge"),
            buyer_accepted: r.get("buyer_accepted"),
            seller_accepted: r.get("seller_accepted"),
            created_at: r.get("created_at"),
        }))
    }

    async fn create_extension_request(
        &self,
        request: &DueDateExtensionRequest,
    ) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO due_date_extensions_tb
               (request_id, transaction_id, milestone_id, account_id, due_date,
                inspection_period, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&request.request_id)
        .bind(&request.transaction_id)
        .bind(&request.milestone_id)
        .bind(request.account_id as i64)
        .bind(request.due_date.to_string())
        .bind(request.inspection_period.to_string())
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn extension_requests(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Vec<DueDateExtensionRequest>, EscrowError> {
        let rows = sqlx::query(
            r#"SELECT * FROM due_date_extensions_tb
               WHERE transaction_id = $1 AND milestone_id = $2 ORDER BY created_at"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(DueDateExtensionRequest {
                    request_id: r.get("request_id"),
                    transaction_id: r.get("transaction_id"),
                    milestone_id: r.get("milestone_id"),
                    account_id: r.get::<i64, _>("account_id") as AccountId,
                    due_date: parse_epoch(r.get::<String, _>("due_date").as_str(), "due_date")?,
                    inspection_period: parse_epoch(
                        r.get::<String, _>("inspection_period").as_str(),
                        "inspection_period",
                    )?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }

    async fn append_activity(&self, log: &ActivityLog) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO activity_logs_tb (transaction_id, description, created_at)
               VALUES ($1, $2, $3)"#,
        )
        .bind(&log.transaction_id)
        .bind(&log.description)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activities_for(&self, transaction_id: &str) -> Result<Vec<ActivityLog>, EscrowError> {
        let rows = sqlx::query(
            "SELECT * FROM activity_logs_tb WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| ActivityLog {
                transaction_id: r.get("transaction_id"),
                description: r.get("description"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn create_refund_intent(&self, intent: &RefundIntent) -> Result<(), EscrowError> {
        sqlx::query(
            r#"INSERT INTO refund_intents_tb
               (intent_id, transaction_id, milestone_id, account_id, amount, currency,
                state, error, retry_count, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(&intent.intent_id)
        .bind(&intent.transaction_id)
        .bind(&intent.milestone_id)
        .bind(intent.account_id as i64)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(intent.state.as_str())
        .bind(&intent.error)
        .bind(intent.retry_count)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refund_intent(&self, intent_id: &str) -> Result<Option<RefundIntent>, EscrowError> {
        let row = sqlx::query("SELECT * FROM refund_intents_tb WHERE intent_id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_intent).transpose()
    }

    async fn refund_intent_for(
        &self,
        transaction_id: &str,
        milestone_id: &str,
    ) -> Result<Option<RefundIntent>, EscrowError> {
        let row = sqlx::query(
            r#"SELECT * FROM refund_intents_tb
               WHERE transaction_id = $1 AND milestone_id = $2
               ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(transaction_id)
        .bind(milestone_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_intent).transpose()
    }

    async fn update_intent_state(
        &self,
        intent_id: &str,
        from: RefundState,
        to: RefundState,
        error: Option<&str>,
    ) -> Result<bool, EscrowError> {
        let result = sqlx::query(
            r#"UPDATE refund_intents_tb
               SET state = $3, error = $4, updated_at = NOW()
               WHERE intent_id = $1 AND state = $2"#,
        )
        .bind(intent_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_intent_retry(&self, intent_id: &str) -> Result<(), EscrowError> {
        sqlx::query(
            r#"UPDATE refund_intents_tb
               SET retry_count = retry_count + 1, updated_at = NOW()
               WHERE intent_id = $1"#,
        )
        .bind(intent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_intents(&self) -> Result<Vec<RefundIntent>, EscrowError> {
        let rows = sqlx::query(
            r#"SELECT * FROM refund_intents_tb
               WHERE state NOT IN ('completed', 'failed') ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_intent).collect()
    }
}
