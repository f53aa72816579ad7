//! Core of the referral ledger.
//!
//! The crate is organised leaf-first:
//!
//! * [`model`]: typed records (users, investments, commissions, withdrawals).
//! * [`ledger`]: the [`ledger::LedgerStore`] contract, the in-memory store,
//!   JSON snapshots with an integrity digest and the mutex-guarded
//!   [`ledger::SharedLedger`].
//! * [`referral`]: the three-level referral graph reader and the commission
//!   calculator.
//! * [`stats`]: referral network and commission summaries.
//! * [`accounts`], [`investments`], [`withdrawals`]: the write-side
//!   operations with their validation rules.
//! * [`api`]: per-endpoint handlers that render the JSON envelopes and pick
//!   the HTTP status.
//!
//! Amounts are `u64` minor units (cents); rates are basis points.

pub mod accounts;
pub mod api;
pub mod config;
pub mod ids;
pub mod investments;
pub mod ledger;
pub mod model;
pub mod referral;
pub mod stats;
pub mod validation;
pub mod withdrawals;

mod error;

pub use config::ServiceConfig;
pub use error::{ErrorKind, ServiceError};
