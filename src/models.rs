//! Transaction data model
//!
//! Record types persisted by the store: the transaction itself (one row
//! per milestone), the append-only audit trail, parties, disputes, broker
//! terms, due-date extension proposals and activity logs.
//!
//! Date-like fields cross the persistence boundary as decimal-string Unix
//! seconds; in memory they are genuine instants ([`EpochSeconds`]).

use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::status::TransactionStatus;

/// Account ID - globally unique, immutable after assignment.
pub type AccountId = u64;

/// Account id used for transitions applied by the reconciliation jobs
/// rather than a live actor.
pub const SYSTEM_ACCOUNT: AccountId = 0;

/// An instant persisted as the decimal-string representation of a Unix
/// timestamp in seconds.
///
/// The stored form is text (`"1767225600"`), so it must be re-parsed
/// before any comparison. Internally this is a real `DateTime<Utc>`;
/// the string form exists only at the persistence boundary. The zero
/// value means "not set" and never compares as past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpochSeconds(DateTime<Utc>);

impl EpochSeconds {
    pub fn from_secs(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH))
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self::from_secs(at.timestamp())
    }

    /// The unset value (epoch zero).
    pub fn zero() -> Self {
        Self(DateTime::UNIX_EPOCH)
    }

    pub fn as_secs(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.as_secs() != 0
    }

    /// Whether this instant lies strictly before `now`. Unset values are
    /// never past, so records without a deadline are left alone by the
    /// reconciliation scans.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.is_set() && self.0 < now
    }
}

impl fmt::Display for EpochSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

impl FromStr for EpochSeconds {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_secs(s.trim().parse::<i64>()?))
    }
}

impl Serialize for EpochSeconds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EpochSeconds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Transaction type: a single deliverable or one of several milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    OneOff,
    Milestone,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::OneOff => "oneoff",
            TransactionKind::Milestone => "milestone",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oneoff" => Ok(TransactionKind::OneOff),
            "milestone" => Ok(TransactionKind::Milestone),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A disbursement recipient carried on the transaction row as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub account_id: AccountId,
    pub amount: Decimal,
}

/// One transaction row. Milestone transactions decompose into N rows
/// sharing `transaction_id` and `parties_id`, each with its own
/// `milestone_id`.
///
/// On `oneoff` rows the monetary totals hold the aggregate; on
/// `milestone` rows they hold the per-milestone amount. Callers branch on
/// `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub milestone_id: String,
    pub parties_id: String,
    pub business_id: String,
    pub title: String,
    pub milestone_title: String,
    pub milestone_index: u32,
    /// Aggregate total across all milestones of the transaction.
    pub grand_total: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount_paid: Decimal,
    pub escrow_charge: Decimal,
    pub currency: String,
    /// JSON-encoded `Vec<Recipient>` disbursed by the update-status job.
    pub recipients: String,
    pub due_date: EpochSeconds,
    pub inspection_period: EpochSeconds,
    pub grace_period: EpochSeconds,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction row in `Draft`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: impl Into<String>,
        milestone_id: impl Into<String>,
        parties_id: impl Into<String>,
        business_id: impl Into<String>,
        title: impl Into<String>,
        kind: TransactionKind,
        amount_paid: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: transaction_id.into(),
            milestone_id: milestone_id.into(),
            parties_id: parties_id.into(),
            business_id: business_id.into(),
            title: title.into(),
            milestone_title: String::new(),
            milestone_index: 0,
            grand_total: amount_paid,
            kind,
            status: TransactionStatus::Draft,
            amount_paid,
            escrow_charge: Decimal::ZERO,
            currency: currency.into(),
            recipients: "[]".to_string(),
            due_date: EpochSeconds::zero(),
            inspection_period: EpochSeconds::zero(),
            grace_period: EpochSeconds::zero(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Decode the JSON recipient list off the row.
    pub fn recipients(&self) -> Result<Vec<Recipient>, serde_json::Error> {
        serde_json::from_str(&self.recipients)
    }

    pub fn set_recipients(&mut self, recipients: &[Recipient]) {
        self.recipients = serde_json::to_string(recipients).unwrap_or_else(|_| "[]".to_string());
    }

    /// Legacy delimiter-encoded title, kept for external callers that
    /// still read the pre-split format.
    pub fn legacy_title(&self) -> String {
        encode_legacy_title(
            &self.title,
            &self.milestone_title,
            self.grand_total,
            self.milestone_index,
        )
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}/{}] {} {} {} status={}",
            self.transaction_id,
            self.milestone_id,
            self.kind,
            self.amount_paid,
            self.currency,
            self.status
        )
    }
}

/// Encode the legacy `<base title>;<milestone title>;<total>;<index>`
/// title field.
pub fn encode_legacy_title(
    title: &str,
    milestone_title: &str,
    grand_total: Decimal,
    index: u32,
) -> String {
    format!("{title};{milestone_title};{grand_total};{index}")
}

/// Parse a legacy encoded title into its components. Missing numeric
/// segments default rather than fail, matching how the historic data was
/// read back.
pub fn parse_legacy_title(encoded: &str) -> (String, String, Decimal, u32) {
    let mut parts = encoded.splitn(4, ';');
    let title = parts.next().unwrap_or_default().to_string();
    let milestone_title = parts.next().unwrap_or_default().to_string();
    let grand_total = parts
        .next()
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(Decimal::ZERO);
    let index = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
    (title, milestone_title, grand_total, index)
}

/// Append-only audit entry, one per successful transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub account_id: AccountId,
    pub transaction_id: String,
    pub milestone_id: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl StateEntry {
    pub fn new(
        account_id: AccountId,
        transaction_id: impl Into<String>,
        milestone_id: impl Into<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            account_id,
            transaction_id: transaction_id.into(),
            milestone_id: milestone_id.into(),
            status,
            created_at: Utc::now(),
        }
    }
}

/// Role of a participant in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Buyer,
    Seller,
    Broker,
    Recipient,
    ChargeBearer,
    Sender,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Buyer => "buyer",
            PartyRole::Seller => "seller",
            PartyRole::Broker => "broker",
            PartyRole::Recipient => "recipient",
            PartyRole::ChargeBearer => "charge_bearer",
            PartyRole::Sender => "sender",
        }
    }
}

impl FromStr for PartyRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(PartyRole::Buyer),
            "seller" => Ok(PartyRole::Seller),
            "broker" => Ok(PartyRole::Broker),
            "recipient" => Ok(PartyRole::Recipient),
            "charge_bearer" => Ok(PartyRole::ChargeBearer),
            "sender" => Ok(PartyRole::Sender),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invitation lifecycle of a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyStatus {
    Created,
    Accepted,
    Rejected,
}

impl PartyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyStatus::Created => "created",
            PartyStatus::Accepted => "accepted",
            PartyStatus::Rejected => "rejected",
        }
    }
}

/// One participant row per `(parties_id, role)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub parties_id: String,
    pub account_id: AccountId,
    pub role: PartyRole,
    pub status: PartyStatus,
    /// Capability set persisted as a generic key-presence map
    /// (`view`, `manage`, ...).
    pub capabilities: HashMap<String, bool>,
}

impl Party {
    pub fn new(parties_id: impl Into<String>, account_id: AccountId, role: PartyRole) -> Self {
        Self {
            parties_id: parties_id.into(),
            account_id,
            role,
            status: PartyStatus::Created,
            capabilities: HashMap::new(),
        }
    }

    pub fn accepted(mut self) -> Self {
        self.status = PartyStatus::Accepted;
        self
    }

    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.capabilities.insert(cap.into(), true);
        self
    }

    pub fn can(&self, cap: &str) -> bool {
        self.capabilities.get(cap).copied().unwrap_or(false)
    }
}

/// At most one live dispute per transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub transaction_id: String,
    pub account_id: AccountId,
    pub reason: String,
    pub status: String,
    pub decision: String,
    pub created_at: DateTime<Utc>,
}

impl Dispute {
    pub fn open(
        transaction_id: impl Into<String>,
        account_id: AccountId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            account_id,
            reason: reason.into(),
            status: "open".to_string(),
            decision: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Broker fee terms with independent buyer/seller acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub transaction_id: String,
    pub broker_charge: Decimal,
    pub buyer_accepted: bool,
    pub seller_accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Proposal to extend a due date. Approval mutates the transaction's
/// `due_date`/`inspection_period` directly; the proposal row itself is
/// never marked approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueDateExtensionRequest {
    pub request_id: String,
    pub transaction_id: String,
    pub milestone_id: String,
    pub account_id: AccountId,
    pub due_date: EpochSeconds,
    pub inspection_period: EpochSeconds,
    pub created_at: DateTime<Utc>,
}

/// Free-text activity log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub transaction_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(transaction_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_epoch_seconds_string_boundary() {
        let ts = EpochSeconds::from_secs(1_767_225_600);
        assert_eq!(ts.to_string(), "1767225600");
        assert_eq!("1767225600".parse::<EpochSeconds>().unwrap(), ts);
        assert!(" 1767225600 ".parse::<EpochSeconds>().is_ok());
        assert!("not-a-date".parse::<EpochSeconds>().is_err());
    }

    #[test]
    fn test_epoch_seconds_is_past() {
        let now = Utc::now();
        assert!(EpochSeconds::from_secs(now.timestamp() - 60).is_past(now));
        assert!(!EpochSeconds::from_secs(now.timestamp() + 60).is_past(now));
        // Unset deadlines never count as overdue
        assert!(!EpochSeconds::zero().is_past(now));
    }

    #[test]
    fn test_epoch_seconds_datetime_roundtrip() {
        let now = Utc::now();
        let ts = EpochSeconds::from_datetime(now);
        // Sub-second precision is dropped at the boundary
        assert_eq!(ts.as_datetime().timestamp(), now.timestamp());
        assert!(ts.is_set());
    }

    #[test]
    fn test_legacy_title_roundtrip() {
        let encoded = encode_legacy_title("Website build", "Design phase", dec!(4500), 2);
        assert_eq!(encoded, "Website build;Design phase;4500;2");
        let (title, milestone, total, index) = parse_legacy_title(&encoded);
        assert_eq!(title, "Website build");
        assert_eq!(milestone, "Design phase");
        assert_eq!(total, dec!(4500));
        assert_eq!(index, 2);
    }

    #[test]
    fn test_legacy_title_malformed_segments_default() {
        let (title, milestone, total, index) = parse_legacy_title("just a title");
        assert_eq!(title, "just a title");
        assert_eq!(milestone, "");
        assert_eq!(total, Decimal::ZERO);
        assert_eq!(index, 0);

        let (_, _, total, index) = parse_legacy_title("a;b;garbage;garbage");
        assert_eq!(total, Decimal::ZERO);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_recipients_roundtrip() {
        let mut tx = Transaction::new(
            "tx-1", "ms-1", "p-1", "biz-1", "Title",
            TransactionKind::OneOff,
            dec!(100),
            "NGN",
        );
        assert!(tx.recipients().unwrap().is_empty());
        tx.set_recipients(&[Recipient { account_id: 42, amount: dec!(60) }]);
        let parsed = tx.recipients().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].account_id, 42);
        assert_eq!(parsed[0].amount, dec!(60));
    }

    #[test]
    fn test_malformed_recipients_is_an_error() {
        let mut tx = Transaction::new(
            "tx-1", "ms-1", "p-1", "biz-1", "Title",
            TransactionKind::OneOff,
            dec!(100),
            "NGN",
        );
        tx.recipients = "{broken".to_string();
        assert!(tx.recipients().is_err());
    }

    #[test]
    fn test_party_capabilities() {
        let party = Party::new("p-1", 7, PartyRole::Buyer)
            .accepted()
            .with_capability("view")
            .with_capability("manage");
        assert!(party.can("view"));
        assert!(party.can("manage"));
        assert!(!party.can("approve"));
        assert_eq!(party.status, PartyStatus::Accepted);
    }
}
