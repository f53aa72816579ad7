//! Withdrawal requests against a user's available balance.

use serde::{Deserialize, Serialize};

use crate::{
    ids,
    ledger::{LedgerMutation, LedgerStore},
    model::{Amount, Timestamp, Withdrawal, WithdrawalStatus},
    validation::Validator,
    ServiceConfig, ServiceError,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: Amount,
    pub wallet_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub eligible: bool,
    pub available_balance: Amount,
    pub locked_balance: Amount,
    pub minimum_withdrawal: Amount,
    pub pending_withdrawals: usize,
    pub reason: Option<String>,
}

pub fn request_withdrawal<S: LedgerStore>(
    store: &mut S,
    config: &ServiceConfig,
    user_id: &str,
    request: WithdrawalRequest,
    now: Timestamp,
) -> Result<Withdrawal, ServiceError> {
    let wallet = request.wallet_address.trim();
    let user = store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;

    let mut v = Validator::new();
    v.check(
        request.amount >= config.minimum_withdrawal,
        "amount",
        "Amount is below the minimum withdrawal",
    )
    .check(!wallet.is_empty(), "walletAddress", "Wallet address is required");
    if !v.has_errors_for("amount") && request.amount > user.balance.available {
        v.reject("amount", "Insufficient available balance");
    }
    v.finish()?;

    let withdrawal = Withdrawal {
        id: ids::record_id(&mut rand::thread_rng(), "wd"),
        user_id: user_id.to_string(),
        amount: request.amount,
        wallet_address: wallet.to_string(),
        status: WithdrawalStatus::Pending,
        created_at: now,
    };
    store.apply_mutations(
        &[LedgerMutation::RecordWithdrawal {
            withdrawal: withdrawal.clone(),
        }],
        now,
    )?;
    tracing::info!(
        withdrawal_id = %withdrawal.id,
        user_id,
        amount = withdrawal.amount,
        "withdrawal requested"
    );
    Ok(withdrawal)
}

/// Newest first.
pub fn list_withdrawals<S: LedgerStore>(
    store: &S,
    user_id: &str,
) -> Result<Vec<Withdrawal>, ServiceError> {
    let mut rows = store.withdrawals_by_user(user_id)?;
    rows.reverse();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}

pub fn check_eligibility<S: LedgerStore>(
    store: &S,
    config: &ServiceConfig,
    user_id: &str,
) -> Result<Eligibility, ServiceError> {
    let user = store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;
    let pending = store
        .withdrawals_by_user(user_id)?
        .iter()
        .filter(|w| w.status == WithdrawalStatus::Pending)
        .count();
    let eligible = user.balance.available >= config.minimum_withdrawal;
    Ok(Eligibility {
        eligible,
        available_balance: user.balance.available,
        locked_balance: user.balance.locked,
        minimum_withdrawal: config.minimum_withdrawal,
        pending_withdrawals: pending,
        reason: (!eligible).then(|| "Available balance is below the minimum withdrawal".into()),
    })
}

fn transition<S: LedgerStore>(
    store: &mut S,
    withdrawal: Withdrawal,
    status: WithdrawalStatus,
    now: Timestamp,
) -> Result<Withdrawal, ServiceError> {
    if withdrawal.status != WithdrawalStatus::Pending {
        return Err(ServiceError::invalid(
            "status",
            format!("Withdrawal is {:?} and can no longer change", withdrawal.status),
        ));
    }
    store.apply_mutations(
        &[LedgerMutation::SetWithdrawalStatus {
            withdrawal_id: withdrawal.id.clone(),
            status,
        }],
        now,
    )?;
    tracing::info!(withdrawal_id = %withdrawal.id, status = ?status, "withdrawal status changed");
    Ok(Withdrawal {
        status,
        ..withdrawal
    })
}

fn find<S: LedgerStore>(store: &S, withdrawal_id: &str) -> Result<Withdrawal, ServiceError> {
    store
        .withdrawal(withdrawal_id)?
        .ok_or_else(|| ServiceError::NotFound {
            entity: "withdrawal",
            id: withdrawal_id.to_string(),
        })
}

/// Only the owner may cancel, and only while pending.
pub fn cancel_withdrawal<S: LedgerStore>(
    store: &mut S,
    user_id: &str,
    withdrawal_id: &str,
    now: Timestamp,
) -> Result<Withdrawal, ServiceError> {
    let withdrawal = find(&*store, withdrawal_id)?;
    if withdrawal.user_id != user_id {
        return Err(ServiceError::Forbidden(format!(
            "withdrawal {withdrawal_id} belongs to another user"
        )));
    }
    transition(store, withdrawal, WithdrawalStatus::Cancelled, now)
}

/// Operator action: the payout left the system, release the locked funds.
pub fn complete_withdrawal<S: LedgerStore>(
    store: &mut S,
    withdrawal_id: &str,
    now: Timestamp,
) -> Result<Withdrawal, ServiceError> {
    let withdrawal = find(&*store, withdrawal_id)?;
    transition(store, withdrawal, WithdrawalStatus::Completed, now)
}
