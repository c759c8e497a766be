//! Refund intent record and saga states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AccountId;

/// Saga state of a refund intent.
///
/// The debit and the credit each get a pending state persisted *before*
/// the remote call, so a crash between persist and call resumes by
/// re-issuing the call under the same idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    Init,
    DebitPending,
    Debited,
    CreditPending,
    Completed,
    Failed,
}

impl RefundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundState::Init => "init",
            RefundState::DebitPending => "debit_pending",
            RefundState::Debited => "debited",
            RefundState::CreditPending => "credit_pending",
            RefundState::Completed => "completed",
            RefundState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundState::Completed | RefundState::Failed)
    }

    /// Whether escrow funds have already been debited in this state.
    /// Once true, the intent must never be failed automatically; only a
    /// successful credit completes it.
    pub fn funds_in_flight(&self) -> bool {
        matches!(self, RefundState::Debited | RefundState::CreditPending)
    }
}

impl fmt::Display for RefundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(RefundState::Init),
            "debit_pending" => Ok(RefundState::DebitPending),
            "debited" => Ok(RefundState::Debited),
            "credit_pending" => Ok(RefundState::CreditPending),
            "completed" => Ok(RefundState::Completed),
            "failed" => Ok(RefundState::Failed),
            _ => Err(()),
        }
    }
}

/// Persisted refund intent: the record that makes the two-call refund
/// sequence resumable instead of silently half-applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundIntent {
    pub intent_id: String,
    pub transaction_id: String,
    pub milestone_id: String,
    /// Buyer account the credit pays out to.
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub state: RefundState,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundIntent {
    pub fn new(
        transaction_id: impl Into<String>,
        milestone_id: impl Into<String>,
        account_id: AccountId,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            intent_id: Uuid::new_v4().to_string(),
            transaction_id: transaction_id.into(),
            milestone_id: milestone_id.into(),
            account_id,
            amount,
            currency: currency.into(),
            state: RefundState::Init,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Idempotency key for the escrow debit step.
    pub fn debit_key(&self) -> String {
        format!("{}:debit", self.intent_id)
    }

    /// Idempotency key for the buyer credit step.
    pub fn credit_key(&self) -> String {
        format!("{}:credit", self.intent_id)
    }
}

impl fmt::Display for RefundIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RefundIntent[{}] tx={}/{} buyer={} {} {} state={}",
            self.intent_id,
            self.transaction_id,
            self.milestone_id,
            self.account_id,
            self.amount,
            self.currency,
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            RefundState::Init,
            RefundState::DebitPending,
            RefundState::Debited,
            RefundState::CreditPending,
            RefundState::Completed,
            RefundState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<RefundState>(), Ok(state));
        }
    }

    #[test]
    fn test_terminal_and_in_flight() {
        assert!(RefundState::Completed.is_terminal());
        assert!(RefundState::Failed.is_terminal());
        assert!(!RefundState::CreditPending.is_terminal());

        assert!(RefundState::Debited.funds_in_flight());
        assert!(RefundState::CreditPending.funds_in_flight());
        assert!(!RefundState::Init.funds_in_flight());
        assert!(!RefundState::DebitPending.funds_in_flight());
    }

    #[test]
    fn test_new_intent() {
        let intent = RefundIntent::new("tx-1", "ms-1", 42, dec!(100), "NGN");
        assert_eq!(intent.state, RefundState::Init);
        assert_eq!(intent.retry_count, 0);
        assert!(intent.error.is_none());
        assert_ne!(intent.debit_key(), intent.credit_key());
    }
}
