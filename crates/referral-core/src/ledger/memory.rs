use std::collections::{BTreeMap, BTreeSet};

use super::{
    LedgerError, LedgerEvent, LedgerMutation, LedgerStore, StoreMeta, MAX_COMMISSION_LEVEL,
};
use crate::model::{
    Amount, Commission, Investment, InvestmentId, InvestmentStatus, Timestamp, User, UserId,
    Withdrawal, WithdrawalId, WithdrawalStatus,
};

/// In-memory tables plus unique indexes. Records are kept in insertion
/// order; the indexes point into the vectors.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub(super) meta: StoreMeta,
    pub(super) users: Vec<User>,
    pub(super) investments: Vec<Investment>,
    pub(super) commissions: Vec<Commission>,
    pub(super) withdrawals: Vec<Withdrawal>,
    pub(super) events: Vec<LedgerEvent>,
    index: Indexes,
}

#[derive(Clone, Debug, Default)]
struct Indexes {
    users: BTreeMap<UserId, usize>,
    usernames: BTreeMap<String, usize>,
    emails: BTreeMap<String, usize>,
    referral_codes: BTreeMap<String, usize>,
    investments: BTreeMap<InvestmentId, usize>,
    commissions: BTreeMap<(InvestmentId, u8), usize>,
    transactions: BTreeSet<String>,
    withdrawals: BTreeMap<WithdrawalId, usize>,
}

impl Indexes {
    fn check_user(&self, user: &User) -> Result<(), LedgerError> {
        if self.users.contains_key(&user.id) {
            return Err(LedgerError::DuplicateRecord {
                kind: "user",
                id: user.id.clone(),
            });
        }
        if self.usernames.contains_key(&user.username.to_lowercase()) {
            return Err(LedgerError::Conflict {
                field: "username",
                value: user.username.clone(),
            });
        }
        if self.emails.contains_key(&user.email.to_lowercase()) {
            return Err(LedgerError::Conflict {
                field: "email",
                value: user.email.clone(),
            });
        }
        if self
            .referral_codes
            .contains_key(&user.referral_code.to_ascii_uppercase())
        {
            return Err(LedgerError::Conflict {
                field: "referralCode",
                value: user.referral_code.clone(),
            });
        }
        Ok(())
    }

    fn add_user(&mut self, user: &User, pos: usize) {
        self.users.insert(user.id.clone(), pos);
        self.usernames.insert(user.username.to_lowercase(), pos);
        self.emails.insert(user.email.to_lowercase(), pos);
        self.referral_codes
            .insert(user.referral_code.to_ascii_uppercase(), pos);
    }

    fn check_transaction(&self, staged: &BTreeSet<String>, id: &str) -> Result<(), LedgerError> {
        if self.transactions.contains(id) || staged.contains(id) {
            return Err(LedgerError::DuplicateTransaction {
                transaction_id: id.to_string(),
            });
        }
        Ok(())
    }
}

/// Effects of the mutations checked so far in the current batch.
#[derive(Default)]
struct Staging {
    investments: BTreeMap<InvestmentId, InvestmentStatus>,
    commissions: BTreeSet<(InvestmentId, u8)>,
    transactions: BTreeSet<String>,
    available: BTreeMap<UserId, Amount>,
    earnings: BTreeMap<UserId, Amount>,
    direct_sales: BTreeMap<UserId, Amount>,
    withdrawals: BTreeMap<WithdrawalId, (UserId, Amount, WithdrawalStatus)>,
}

/// Adds to a money counter, refusing to wrap.
fn credit(
    current: Amount,
    amount: Amount,
    user_id: &str,
    field: &'static str,
) -> Result<Amount, LedgerError> {
    current
        .checked_add(amount)
        .ok_or_else(|| LedgerError::AmountOverflow {
            user_id: user_id.to_string(),
            field,
        })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds every index from the record vectors, failing on the first
    /// uniqueness or referrer violation.
    pub(super) fn reindex(&mut self) -> Result<(), LedgerError> {
        let mut index = Indexes::default();
        for (pos, user) in self.users.iter().enumerate() {
            index.check_user(user)?;
            if let Some(referrer) = &user.referred_by {
                if referrer == &user.id {
                    return Err(LedgerError::SelfReferral {
                        user_id: user.id.clone(),
                    });
                }
                // referrers always register first, so they are indexed already
                if !index.users.contains_key(referrer) {
                    return Err(LedgerError::UnknownUser {
                        user_id: referrer.clone(),
                    });
                }
            }
            index.add_user(user, pos);
        }
        let none = BTreeSet::new();
        for (pos, investment) in self.investments.iter().enumerate() {
            if index.investments.insert(investment.id.clone(), pos).is_some() {
                return Err(LedgerError::DuplicateRecord {
                    kind: "investment",
                    id: investment.id.clone(),
                });
            }
            index.check_transaction(&none, &investment.transaction_id)?;
            index.transactions.insert(investment.transaction_id.clone());
        }
        for (pos, commission) in self.commissions.iter().enumerate() {
            let key = (commission.investment_id.clone(), commission.level);
            if index.commissions.insert(key, pos).is_some() {
                return Err(LedgerError::DuplicateCommission {
                    investment_id: commission.investment_id.clone(),
                    level: commission.level,
                });
            }
            index.check_transaction(&none, &commission.transaction_id)?;
            index.transactions.insert(commission.transaction_id.clone());
        }
        for (pos, withdrawal) in self.withdrawals.iter().enumerate() {
            if index.withdrawals.insert(withdrawal.id.clone(), pos).is_some() {
                return Err(LedgerError::DuplicateRecord {
                    kind: "withdrawal",
                    id: withdrawal.id.clone(),
                });
            }
        }
        self.index = index;
        Ok(())
    }

    fn user_pos(&self, id: &str) -> Result<usize, LedgerError> {
        self.index
            .users
            .get(id)
            .copied()
            .ok_or_else(|| LedgerError::UnknownUser {
                user_id: id.to_string(),
            })
    }

    fn investment_pos(&self, id: &str) -> Result<usize, LedgerError> {
        self.index
            .investments
            .get(id)
            .copied()
            .ok_or_else(|| LedgerError::UnknownInvestment {
                investment_id: id.to_string(),
            })
    }

    fn withdrawal_pos(&self, id: &str) -> Result<usize, LedgerError> {
        self.index
            .withdrawals
            .get(id)
            .copied()
            .ok_or_else(|| LedgerError::UnknownWithdrawal {
                withdrawal_id: id.to_string(),
            })
    }

    fn bump(&mut self, timestamp: Timestamp) {
        self.meta.height += 1;
        self.meta.updated_at = timestamp;
    }

    /// Current value of a per-user counter, counting mutations already
    /// staged in this batch.
    fn staged(
        &self,
        staged: &BTreeMap<UserId, Amount>,
        user_id: &str,
        read: impl Fn(&User) -> Amount,
    ) -> Result<Amount, LedgerError> {
        match staged.get(user_id) {
            Some(amount) => Ok(*amount),
            None => Ok(read(&self.users[self.user_pos(user_id)?])),
        }
    }

    fn staged_available(&self, staging: &Staging, user_id: &str) -> Result<Amount, LedgerError> {
        self.staged(&staging.available, user_id, |u| u.balance.available)
    }

    fn check_batch(&self, mutations: &[LedgerMutation]) -> Result<(), LedgerError> {
        let mut staging = Staging::default();
        for mutation in mutations {
            match mutation {
                LedgerMutation::RecordInvestment { investment } => {
                    self.user_pos(&investment.user_id)?;
                    if self.index.investments.contains_key(&investment.id)
                        || staging.investments.contains_key(&investment.id)
                    {
                        return Err(LedgerError::DuplicateRecord {
                            kind: "investment",
                            id: investment.id.clone(),
                        });
                    }
                    self.index
                        .check_transaction(&staging.transactions, &investment.transaction_id)?;
                    staging
                        .transactions
                        .insert(investment.transaction_id.clone());
                    staging
                        .investments
                        .insert(investment.id.clone(), investment.status);
                }
                LedgerMutation::SetInvestmentStatus {
                    investment_id,
                    status,
                } => {
                    let current = match staging.investments.get(investment_id) {
                        Some(status) => *status,
                        None => self.investments[self.investment_pos(investment_id)?].status,
                    };
                    if !current.can_become(*status) {
                        return Err(LedgerError::InvalidTransition {
                            kind: "investment",
                            id: investment_id.clone(),
                            from: format!("{current:?}"),
                            to: format!("{status:?}"),
                        });
                    }
                    staging.investments.insert(investment_id.clone(), *status);
                }
                LedgerMutation::PostCommission { commission } => {
                    if commission.level == 0 || commission.level > MAX_COMMISSION_LEVEL {
                        return Err(LedgerError::InvalidLevel {
                            level: commission.level,
                            max: MAX_COMMISSION_LEVEL,
                        });
                    }
                    self.user_pos(&commission.from_user_id)?;
                    if !self.index.investments.contains_key(&commission.investment_id)
                        && !staging.investments.contains_key(&commission.investment_id)
                    {
                        return Err(LedgerError::UnknownInvestment {
                            investment_id: commission.investment_id.clone(),
                        });
                    }
                    let key = (commission.investment_id.clone(), commission.level);
                    if self.index.commissions.contains_key(&key)
                        || !staging.commissions.insert(key)
                    {
                        return Err(LedgerError::DuplicateCommission {
                            investment_id: commission.investment_id.clone(),
                            level: commission.level,
                        });
                    }
                    self.index
                        .check_transaction(&staging.transactions, &commission.transaction_id)?;
                    staging
                        .transactions
                        .insert(commission.transaction_id.clone());
                    let earner = &commission.user_id;
                    let amount = commission.commission_amount;
                    let available = self.staged_available(&staging, earner)?;
                    staging
                        .available
                        .insert(earner.clone(), credit(available, amount, earner, "balance")?);
                    let earned =
                        self.staged(&staging.earnings, earner, |u| u.total_referral_earnings)?;
                    staging.earnings.insert(
                        earner.clone(),
                        credit(earned, amount, earner, "totalReferralEarnings")?,
                    );
                }
                LedgerMutation::CreditDirectSales { user_id, amount } => {
                    let sales = self.staged(&staging.direct_sales, user_id, |u| u.direct_sales)?;
                    staging.direct_sales.insert(
                        user_id.clone(),
                        credit(sales, *amount, user_id, "directSales")?,
                    );
                }
                LedgerMutation::RecordWithdrawal { withdrawal } => {
                    if self.index.withdrawals.contains_key(&withdrawal.id)
                        || staging.withdrawals.contains_key(&withdrawal.id)
                    {
                        return Err(LedgerError::DuplicateRecord {
                            kind: "withdrawal",
                            id: withdrawal.id.clone(),
                        });
                    }
                    if withdrawal.status != WithdrawalStatus::Pending {
                        return Err(LedgerError::InvalidTransition {
                            kind: "withdrawal",
                            id: withdrawal.id.clone(),
                            from: "new".into(),
                            to: format!("{:?}", withdrawal.status),
                        });
                    }
                    let available = self.staged_available(&staging, &withdrawal.user_id)?;
                    let remaining = available.checked_sub(withdrawal.amount).ok_or_else(|| {
                        LedgerError::InsufficientFunds {
                            user_id: withdrawal.user_id.clone(),
                        }
                    })?;
                    staging
                        .available
                        .insert(withdrawal.user_id.clone(), remaining);
                    staging.withdrawals.insert(
                        withdrawal.id.clone(),
                        (
                            withdrawal.user_id.clone(),
                            withdrawal.amount,
                            withdrawal.status,
                        ),
                    );
                }
                LedgerMutation::SetWithdrawalStatus {
                    withdrawal_id,
                    status,
                } => {
                    let (user_id, amount, current) = match staging.withdrawals.get(withdrawal_id)
                    {
                        Some(entry) => entry.clone(),
                        None => {
                            let w = &self.withdrawals[self.withdrawal_pos(withdrawal_id)?];
                            (w.user_id.clone(), w.amount, w.status)
                        }
                    };
                    if current != WithdrawalStatus::Pending || *status == WithdrawalStatus::Pending
                    {
                        return Err(LedgerError::InvalidTransition {
                            kind: "withdrawal",
                            id: withdrawal_id.clone(),
                            from: format!("{current:?}"),
                            to: format!("{status:?}"),
                        });
                    }
                    if *status == WithdrawalStatus::Cancelled {
                        let available = self.staged_available(&staging, &user_id)?;
                        let restored = credit(available, amount, &user_id, "balance")?;
                        staging.available.insert(user_id.clone(), restored);
                    }
                    staging
                        .withdrawals
                        .insert(withdrawal_id.clone(), (user_id, amount, *status));
                }
            }
        }
        Ok(())
    }

    fn apply_one(&mut self, mutation: &LedgerMutation, at: Timestamp) -> Result<(), LedgerError> {
        match mutation {
            LedgerMutation::RecordInvestment { investment } => {
                let pos = self.investments.len();
                self.index.investments.insert(investment.id.clone(), pos);
                self.index
                    .transactions
                    .insert(investment.transaction_id.clone());
                self.investments.push(investment.clone());
                self.events.push(LedgerEvent::InvestmentRecorded {
                    investment_id: investment.id.clone(),
                    user_id: investment.user_id.clone(),
                    amount: investment.amount,
                    at,
                });
            }
            LedgerMutation::SetInvestmentStatus {
                investment_id,
                status,
            } => {
                let pos = self.investment_pos(investment_id)?;
                self.investments[pos].status = *status;
                self.events.push(LedgerEvent::InvestmentStatusChanged {
                    investment_id: investment_id.clone(),
                    status: *status,
                    at,
                });
            }
            LedgerMutation::PostCommission { commission } => {
                let earner = self.user_pos(&commission.user_id)?;
                let user = &mut self.users[earner];
                let amount = commission.commission_amount;
                user.total_referral_earnings = credit(
                    user.total_referral_earnings,
                    amount,
                    &commission.user_id,
                    "totalReferralEarnings",
                )?;
                user.balance.available =
                    credit(user.balance.available, amount, &commission.user_id, "balance")?;
                let pos = self.commissions.len();
                self.index.commissions.insert(
                    (commission.investment_id.clone(), commission.level),
                    pos,
                );
                self.index
                    .transactions
                    .insert(commission.transaction_id.clone());
                self.commissions.push(commission.clone());
                self.events.push(LedgerEvent::CommissionPosted {
                    transaction_id: commission.transaction_id.clone(),
                    user_id: commission.user_id.clone(),
                    investment_id: commission.investment_id.clone(),
                    level: commission.level,
                    amount: commission.commission_amount,
                    at,
                });
            }
            LedgerMutation::CreditDirectSales { user_id, amount } => {
                let pos = self.user_pos(user_id)?;
                let user = &mut self.users[pos];
                user.direct_sales = credit(user.direct_sales, *amount, user_id, "directSales")?;
                self.events.push(LedgerEvent::DirectSalesCredited {
                    user_id: user_id.clone(),
                    amount: *amount,
                    at,
                });
            }
            LedgerMutation::RecordWithdrawal { withdrawal } => {
                let owner = self.user_pos(&withdrawal.user_id)?;
                let balance = &mut self.users[owner].balance;
                balance.available = balance
                    .available
                    .checked_sub(withdrawal.amount)
                    .ok_or_else(|| LedgerError::InsufficientFunds {
                        user_id: withdrawal.user_id.clone(),
                    })?;
                balance.locked =
                    credit(balance.locked, withdrawal.amount, &withdrawal.user_id, "locked")?;
                let pos = self.withdrawals.len();
                self.index.withdrawals.insert(withdrawal.id.clone(), pos);
                self.withdrawals.push(withdrawal.clone());
                self.events.push(LedgerEvent::FundsLocked {
                    withdrawal_id: withdrawal.id.clone(),
                    user_id: withdrawal.user_id.clone(),
                    amount: withdrawal.amount,
                    at,
                });
            }
            LedgerMutation::SetWithdrawalStatus {
                withdrawal_id,
                status,
            } => {
                let pos = self.withdrawal_pos(withdrawal_id)?;
                self.withdrawals[pos].status = *status;
                let (user_id, amount) = (
                    self.withdrawals[pos].user_id.clone(),
                    self.withdrawals[pos].amount,
                );
                let owner = self.user_pos(&user_id)?;
                let balance = &mut self.users[owner].balance;
                balance.locked = balance.locked.saturating_sub(amount);
                let event = if *status == WithdrawalStatus::Cancelled {
                    balance.available = credit(balance.available, amount, &user_id, "balance")?;
                    LedgerEvent::FundsUnlocked {
                        withdrawal_id: withdrawal_id.clone(),
                        user_id,
                        amount,
                        at,
                    }
                } else {
                    LedgerEvent::FundsReleased {
                        withdrawal_id: withdrawal_id.clone(),
                        user_id,
                        amount,
                        at,
                    }
                };
                self.events.push(event);
            }
        }
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn meta(&self) -> StoreMeta {
        self.meta.clone()
    }

    fn user(&self, id: &str) -> Result<Option<User>, LedgerError> {
        Ok(self.index.users.get(id).map(|pos| self.users[*pos].clone()))
    }

    fn user_by_referral_code(&self, code: &str) -> Result<Option<User>, LedgerError> {
        let key = code.trim().to_ascii_uppercase();
        Ok(self
            .index
            .referral_codes
            .get(&key)
            .map(|pos| self.users[*pos].clone()))
    }

    fn users_referred_by(&self, referrers: &BTreeSet<UserId>) -> Result<Vec<User>, LedgerError> {
        if referrers.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .users
            .iter()
            .filter(|u| {
                u.referred_by
                    .as_ref()
                    .map_or(false, |r| referrers.contains(r))
            })
            .cloned()
            .collect())
    }

    fn insert_user(&mut self, mut user: User, at: Timestamp) -> Result<(), LedgerError> {
        self.index.check_user(&user)?;
        let referrer = match &user.referred_by {
            Some(referrer) if referrer == &user.id => {
                return Err(LedgerError::SelfReferral {
                    user_id: user.id.clone(),
                })
            }
            Some(referrer) => Some(self.user_pos(referrer)?),
            None => None,
        };
        user.direct_referrals.clear();
        let pos = self.users.len();
        self.index.add_user(&user, pos);
        if let Some(referrer) = referrer {
            self.users[referrer].direct_referrals.push(user.id.clone());
        }
        self.events.push(LedgerEvent::UserRegistered {
            user_id: user.id.clone(),
            referred_by: user.referred_by.clone(),
            at,
        });
        self.users.push(user);
        self.bump(at);
        Ok(())
    }

    fn investment(&self, id: &str) -> Result<Option<Investment>, LedgerError> {
        Ok(self
            .index
            .investments
            .get(id)
            .map(|pos| self.investments[*pos].clone()))
    }

    fn investments_by_user(&self, user_id: &str) -> Result<Vec<Investment>, LedgerError> {
        Ok(self
            .investments
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn active_investment_totals(
        &self,
        owners: &BTreeSet<UserId>,
    ) -> Result<BTreeMap<UserId, u128>, LedgerError> {
        let mut totals = BTreeMap::new();
        for investment in &self.investments {
            if investment.status == InvestmentStatus::Active && owners.contains(&investment.user_id)
            {
                let total: &mut u128 = totals.entry(investment.user_id.clone()).or_default();
                *total += u128::from(investment.amount);
            }
        }
        Ok(totals)
    }

    fn commissions_for_investment(
        &self,
        investment_id: &str,
    ) -> Result<Vec<Commission>, LedgerError> {
        Ok((1..=MAX_COMMISSION_LEVEL)
            .filter_map(|level| {
                self.index
                    .commissions
                    .get(&(investment_id.to_string(), level))
                    .map(|pos| self.commissions[*pos].clone())
            })
            .collect())
    }

    fn commissions_earned_by(&self, user_id: &str) -> Result<Vec<Commission>, LedgerError> {
        Ok(self
            .commissions
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    fn withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, LedgerError> {
        Ok(self
            .index
            .withdrawals
            .get(id)
            .map(|pos| self.withdrawals[*pos].clone()))
    }

    fn withdrawals_by_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        Ok(self
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    fn events(&self) -> Result<Vec<LedgerEvent>, LedgerError> {
        Ok(self.events.clone())
    }

    fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        timestamp: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_batch(mutations)?;
        for mutation in mutations {
            self.apply_one(mutation, timestamp)?;
        }
        self.bump(timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Balance, CommissionStatus};

    fn user(id: &str, referred_by: Option<&str>) -> User {
        User {
            id: id.into(),
            username: id.into(),
            email: format!("{id}@example.com"),
            full_name: id.to_uppercase(),
            password_digest: String::new(),
            referral_code: format!("CODE{}", id.to_uppercase()),
            referred_by: referred_by.map(str::to_string),
            direct_referrals: vec![],
            direct_sales: 0,
            total_referral_earnings: 0,
            weekly_salary: 0,
            balance: Balance::default(),
            created_at: 1,
        }
    }

    fn investment(id: &str, owner: &str, amount: Amount) -> Investment {
        Investment {
            id: id.into(),
            user_id: owner.into(),
            amount,
            status: InvestmentStatus::Active,
            transaction_id: format!("INV-{id}"),
            payment_method: None,
            transaction_hash: None,
            created_at: 1,
        }
    }

    fn commission(
        investment_id: &str,
        earner: &str,
        from: &str,
        level: u8,
        amount: Amount,
    ) -> Commission {
        Commission {
            transaction_id: format!("COM-{investment_id}-{level}"),
            user_id: earner.into(),
            from_user_id: from.into(),
            investment_id: investment_id.into(),
            level,
            rate_bps: 1_200,
            investment_amount: amount.saturating_mul(10),
            commission_amount: amount,
            status: CommissionStatus::Paid,
            created_at: 1,
        }
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert_user(user("alice", None), 1).unwrap();
        store.insert_user(user("bob", Some("alice")), 2).unwrap();
        store
    }

    #[test]
    fn insert_user_links_referrer() {
        let store = seeded();
        let alice = store.require_user("alice").unwrap();
        assert_eq!(alice.direct_referrals, vec!["bob".to_string()]);
        assert_eq!(store.meta().height, 2);
        assert_eq!(store.events().unwrap().len(), 2);
    }

    #[test]
    fn insert_user_enforces_uniqueness_and_forest() {
        let mut store = seeded();
        let mut dup = user("carol", None);
        dup.username = "ALICE".into();
        assert!(matches!(
            store.insert_user(dup, 3),
            Err(LedgerError::Conflict { field: "username", .. })
        ));
        assert!(matches!(
            store.insert_user(user("carol", Some("carol")), 3),
            Err(LedgerError::SelfReferral { .. })
        ));
        assert!(matches!(
            store.insert_user(user("carol", Some("nobody")), 3),
            Err(LedgerError::UnknownUser { .. })
        ));
        assert_eq!(store.meta().height, 2);
    }

    #[test]
    fn referral_code_lookup_is_case_insensitive() {
        let store = seeded();
        let found = store.user_by_referral_code(" codealice ").unwrap().unwrap();
        assert_eq!(found.id, "alice");
    }

    #[test]
    fn commission_batch_credits_earner() {
        let mut store = seeded();
        store
            .apply_mutations(
                &[
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv1", "bob", 10_000),
                    },
                    LedgerMutation::PostCommission {
                        commission: commission("inv1", "alice", "bob", 1, 1_200),
                    },
                    LedgerMutation::CreditDirectSales {
                        user_id: "alice".into(),
                        amount: 10_000,
                    },
                ],
                5,
            )
            .unwrap();
        let alice = store.require_user("alice").unwrap();
        assert_eq!(alice.total_referral_earnings, 1_200);
        assert_eq!(alice.balance.available, 1_200);
        assert_eq!(alice.direct_sales, 10_000);
        assert_eq!(store.commissions_for_investment("inv1").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_level_rejects_whole_batch() {
        let mut store = seeded();
        store
            .apply_mutations(
                &[LedgerMutation::RecordInvestment {
                    investment: investment("inv1", "bob", 10_000),
                }],
                5,
            )
            .unwrap();
        let mut second = commission("inv1", "alice", "bob", 1, 1_200);
        second.transaction_id = "COM-other".into();
        let err = store
            .apply_mutations(
                &[
                    LedgerMutation::PostCommission {
                        commission: commission("inv1", "alice", "bob", 1, 1_200),
                    },
                    LedgerMutation::PostCommission { commission: second },
                ],
                6,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCommission { level: 1, .. }));
        assert!(store.commissions_for_investment("inv1").unwrap().is_empty());
        assert_eq!(store.require_user("alice").unwrap().total_referral_earnings, 0);
    }

    #[test]
    fn earnings_never_wrap() {
        let mut store = seeded();
        store
            .apply_mutations(
                &[
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv1", "bob", u64::MAX),
                    },
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv2", "bob", u64::MAX),
                    },
                    LedgerMutation::PostCommission {
                        commission: commission("inv1", "alice", "bob", 1, u64::MAX - 1),
                    },
                ],
                5,
            )
            .unwrap();
        let err = store
            .apply_mutations(
                &[LedgerMutation::PostCommission {
                    commission: commission("inv2", "alice", "bob", 1, 2),
                }],
                6,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::AmountOverflow { field: "balance", .. }));
        let alice = store.require_user("alice").unwrap();
        assert_eq!(alice.total_referral_earnings, u64::MAX - 1);
        assert_eq!(alice.balance.available, u64::MAX - 1);
        assert!(store.commissions_for_investment("inv2").unwrap().is_empty());
    }

    #[test]
    fn commission_requires_known_investment_and_level() {
        let mut store = seeded();
        let err = store
            .apply_mutations(
                &[LedgerMutation::PostCommission {
                    commission: commission("ghost", "alice", "bob", 1, 1),
                }],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownInvestment { .. }));

        store
            .apply_mutations(
                &[LedgerMutation::RecordInvestment {
                    investment: investment("inv1", "bob", 100),
                }],
                1,
            )
            .unwrap();
        let err = store
            .apply_mutations(
                &[LedgerMutation::PostCommission {
                    commission: commission("inv1", "alice", "bob", 4, 1),
                }],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidLevel { level: 4, .. }));
    }

    #[test]
    fn withdrawal_locks_then_unlocks() {
        let mut store = seeded();
        store
            .apply_mutations(
                &[
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv1", "bob", 10_000),
                    },
                    LedgerMutation::PostCommission {
                        commission: commission("inv1", "alice", "bob", 1, 1_200),
                    },
                    LedgerMutation::RecordWithdrawal {
                        withdrawal: Withdrawal {
                            id: "wd1".into(),
                            user_id: "alice".into(),
                            amount: 1_000,
                            wallet_address: "0xabc".into(),
                            status: WithdrawalStatus::Pending,
                            created_at: 1,
                        },
                    },
                ],
                5,
            )
            .unwrap();
        let alice = store.require_user("alice").unwrap();
        assert_eq!(alice.balance, Balance { available: 200, locked: 1_000 });

        store
            .apply_mutations(
                &[LedgerMutation::SetWithdrawalStatus {
                    withdrawal_id: "wd1".into(),
                    status: WithdrawalStatus::Cancelled,
                }],
                6,
            )
            .unwrap();
        let alice = store.require_user("alice").unwrap();
        assert_eq!(alice.balance, Balance { available: 1_200, locked: 0 });

        let err = store
            .apply_mutations(
                &[LedgerMutation::SetWithdrawalStatus {
                    withdrawal_id: "wd1".into(),
                    status: WithdrawalStatus::Completed,
                }],
                7,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[test]
    fn withdrawal_beyond_balance_is_rejected() {
        let mut store = seeded();
        let err = store
            .apply_mutations(
                &[LedgerMutation::RecordWithdrawal {
                    withdrawal: Withdrawal {
                        id: "wd1".into(),
                        user_id: "bob".into(),
                        amount: 500,
                        wallet_address: "0xabc".into(),
                        status: WithdrawalStatus::Pending,
                        created_at: 1,
                    },
                }],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert!(store.withdrawals_by_user("bob").unwrap().is_empty());
    }

    #[test]
    fn active_totals_group_by_owner() {
        let mut store = seeded();
        let mut done = investment("inv3", "bob", 900);
        done.status = InvestmentStatus::Completed;
        store
            .apply_mutations(
                &[
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv1", "bob", 1_000),
                    },
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv2", "bob", 500),
                    },
                    LedgerMutation::RecordInvestment { investment: done },
                    LedgerMutation::RecordInvestment {
                        investment: investment("inv4", "alice", 700),
                    },
                ],
                1,
            )
            .unwrap();
        let owners: BTreeSet<UserId> = ["bob".to_string()].into_iter().collect();
        let totals = store.active_investment_totals(&owners).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals["bob"], 1_500);
    }
}
