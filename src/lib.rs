//! escrowd - Escrow transaction lifecycle engine
//!
//! Manages escrow-backed commercial transactions between counterparties,
//! driving each one through a multi-stage lifecycle from creation to fund
//! disbursement or refund.
//!
//! # Modules
//!
//! - [`status`] - Status registry (short codes, canonical labels)
//! - [`models`] - Transaction, audit trail, parties, disputes
//! - [`charge`] - Escrow charge calculation from business fee schedules
//! - [`store`] - Persistence trait with in-memory and Postgres backends
//! - [`clients`] - External collaborator contracts and recording mocks
//! - [`lifecycle`] - Synchronous transition operations
//! - [`refund`] - Debit-then-credit refund saga and disbursement
//! - [`scheduler`] - Five recurring reconciliation jobs
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing initialisation

pub mod charge;
pub mod clients;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod refund;
pub mod scheduler;
pub mod status;
pub mod store;

// Convenient re-exports at crate root
pub use charge::{BusinessCharge, ChargeTier, compute_charge, quote_charge};
pub use error::EscrowError;
pub use lifecycle::LifecycleService;
pub use models::{
    AccountId, ActivityLog, Dispute, EpochSeconds, Party, PartyRole, PartyStatus, Recipient,
    StateEntry, Transaction, TransactionKind,
};
pub use refund::{RefundIntent, RefundOrchestrator, RefundState};
pub use scheduler::{Job, Scheduler};
pub use status::TransactionStatus;
pub use store::{MemoryStore, PgStore, TransactionStore};
