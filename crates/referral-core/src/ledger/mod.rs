//! Ledger store: the only owner of users, investments, commissions and
//! withdrawals.
//!
//! Writes go through [`LedgerStore::insert_user`] or a batch of
//! [`LedgerMutation`]s. A batch is checked as a whole before any of it is
//! applied, so a rejected batch leaves the store untouched.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::model::{
    Amount, Commission, Investment, InvestmentId, InvestmentStatus, Timestamp, User, UserId,
    Withdrawal, WithdrawalId, WithdrawalStatus,
};

mod lock;
mod memory;
mod snapshot;

pub use lock::LedgerLock;
pub use memory::MemoryStore;
pub use snapshot::{LedgerSnapshot, SNAPSHOT_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown user {user_id}")]
    UnknownUser { user_id: UserId },
    #[error("unknown investment {investment_id}")]
    UnknownInvestment { investment_id: InvestmentId },
    #[error("unknown withdrawal {withdrawal_id}")]
    UnknownWithdrawal { withdrawal_id: WithdrawalId },
    #[error("{field} {value} is already taken")]
    Conflict { field: &'static str, value: String },
    #[error("user {user_id} cannot refer itself")]
    SelfReferral { user_id: UserId },
    #[error("{kind} {id} already recorded")]
    DuplicateRecord { kind: &'static str, id: String },
    #[error("commission for investment {investment_id} level {level} already posted")]
    DuplicateCommission {
        investment_id: InvestmentId,
        level: u8,
    },
    #[error("transaction id {transaction_id} already used")]
    DuplicateTransaction { transaction_id: String },
    #[error("commission level {level} outside 1..={max}")]
    InvalidLevel { level: u8, max: u8 },
    #[error("{kind} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("insufficient available balance for user {user_id}")]
    InsufficientFunds { user_id: UserId },
    #[error("{field} of user {user_id} would exceed the representable amount")]
    AmountOverflow { user_id: UserId, field: &'static str },
    #[error("snapshot digest mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("ledger lock poisoned")]
    LockPoisoned,
    #[error("ledger still has {0} live handles")]
    StillShared(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deepest commission level the store accepts.
pub const MAX_COMMISSION_LEVEL: u8 = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerMutation {
    RecordInvestment {
        investment: Investment,
    },
    SetInvestmentStatus {
        investment_id: InvestmentId,
        status: InvestmentStatus,
    },
    /// Inserts the row and credits the earner's earnings and balance.
    PostCommission {
        commission: Commission,
    },
    CreditDirectSales {
        user_id: UserId,
        amount: Amount,
    },
    /// Inserts the request and moves its amount from available to locked.
    RecordWithdrawal {
        withdrawal: Withdrawal,
    },
    /// `cancelled` unlocks the amount, `completed` releases it.
    SetWithdrawalStatus {
        withdrawal_id: WithdrawalId,
        status: WithdrawalStatus,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    UserRegistered {
        user_id: UserId,
        referred_by: Option<UserId>,
        at: Timestamp,
    },
    InvestmentRecorded {
        investment_id: InvestmentId,
        user_id: UserId,
        amount: Amount,
        at: Timestamp,
    },
    InvestmentStatusChanged {
        investment_id: InvestmentId,
        status: InvestmentStatus,
        at: Timestamp,
    },
    CommissionPosted {
        transaction_id: String,
        user_id: UserId,
        investment_id: InvestmentId,
        level: u8,
        amount: Amount,
        at: Timestamp,
    },
    DirectSalesCredited {
        user_id: UserId,
        amount: Amount,
        at: Timestamp,
    },
    FundsLocked {
        withdrawal_id: WithdrawalId,
        user_id: UserId,
        amount: Amount,
        at: Timestamp,
    },
    FundsUnlocked {
        withdrawal_id: WithdrawalId,
        user_id: UserId,
        amount: Amount,
        at: Timestamp,
    },
    FundsReleased {
        withdrawal_id: WithdrawalId,
        user_id: UserId,
        amount: Amount,
        at: Timestamp,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StoreMeta {
    /// Number of successful writes.
    pub height: u64,
    pub updated_at: Timestamp,
}

/// Persistence contract. Read methods return owned records in insertion
/// order unless stated otherwise.
pub trait LedgerStore {
    fn meta(&self) -> StoreMeta;

    fn user(&self, id: &str) -> Result<Option<User>, LedgerError>;
    fn user_by_referral_code(&self, code: &str) -> Result<Option<User>, LedgerError>;
    /// Users whose `referred_by` is one of `referrers`.
    fn users_referred_by(&self, referrers: &BTreeSet<UserId>) -> Result<Vec<User>, LedgerError>;
    /// Enforces unique id, username, email and referral code, and that the
    /// referrer exists and is not the user itself.
    fn insert_user(&mut self, user: User, at: Timestamp) -> Result<(), LedgerError>;

    fn investment(&self, id: &str) -> Result<Option<Investment>, LedgerError>;
    fn investments_by_user(&self, user_id: &str) -> Result<Vec<Investment>, LedgerError>;
    /// Sum of active investment amounts, grouped by owner, for `owners` only.
    /// Widened so that many large investments cannot wrap.
    fn active_investment_totals(
        &self,
        owners: &BTreeSet<UserId>,
    ) -> Result<BTreeMap<UserId, u128>, LedgerError>;

    fn commissions_for_investment(
        &self,
        investment_id: &str,
    ) -> Result<Vec<Commission>, LedgerError>;
    fn commissions_earned_by(&self, user_id: &str) -> Result<Vec<Commission>, LedgerError>;

    fn withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, LedgerError>;
    fn withdrawals_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, LedgerError>;

    fn events(&self) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// All-or-nothing.
    fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        timestamp: Timestamp,
    ) -> Result<(), LedgerError>;

    fn require_user(&self, id: &str) -> Result<User, LedgerError> {
        self.user(id)?.ok_or_else(|| LedgerError::UnknownUser {
            user_id: id.to_string(),
        })
    }
}

/// A store shared between concurrent requests. Every operation holds the
/// lock for its whole read-check-write sequence.
pub struct SharedLedger<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedLedger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LedgerStore> SharedLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn read<R, E>(&self, op: impl FnOnce(&S) -> Result<R, E>) -> Result<R, E>
    where
        E: From<LedgerError>,
    {
        let guard = self.inner.lock().map_err(|_| LedgerError::LockPoisoned)?;
        op(&guard)
    }

    pub fn write<R, E>(&self, op: impl FnOnce(&mut S) -> Result<R, E>) -> Result<R, E>
    where
        E: From<LedgerError>,
    {
        let mut guard = self.inner.lock().map_err(|_| LedgerError::LockPoisoned)?;
        op(&mut guard)
    }

    /// Recovers the store once every other handle has been dropped.
    pub fn into_inner(self) -> Result<S, LedgerError> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().map_err(|_| LedgerError::LockPoisoned),
            Err(shared) => Err(LedgerError::StillShared(Arc::strong_count(&shared))),
        }
    }
}
