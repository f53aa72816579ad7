//! Deposit confirmation and investment status changes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    ids,
    ledger::{LedgerMutation, LedgerStore},
    model::{Amount, Commission, Investment, InvestmentStatus, PaymentMethod, Timestamp},
    referral::{count_postings, CommissionCalculator},
    validation::Validator,
    ServiceConfig, ServiceError,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub amount: Amount,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvestmentReceipt {
    pub investment: Investment,
    pub commissions: Vec<Commission>,
}

/// Records an active investment for `user_id` and pays its upstream chain in
/// the same ledger batch.
pub fn confirm_deposit<S: LedgerStore>(
    store: &mut S,
    config: &ServiceConfig,
    user_id: &str,
    request: DepositRequest,
    now: Timestamp,
) -> Result<InvestmentReceipt, ServiceError> {
    let mut v = Validator::new();
    v.check(
        request.amount >= config.minimum_investment,
        "amount",
        "Amount is below the minimum investment",
    );
    v.finish()?;
    store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;

    let mut rng = rand::thread_rng();
    let investment = Investment {
        id: ids::record_id(&mut rng, "inv"),
        user_id: user_id.to_string(),
        amount: request.amount,
        status: InvestmentStatus::Active,
        transaction_id: ids::transaction_id(&mut rng, "INV", ids::now_millis()),
        payment_method: request.payment_method,
        transaction_hash: request
            .transaction_hash
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty()),
        created_at: now,
    };

    let calculator = CommissionCalculator::new(&config.schedule);
    let payouts = calculator.plan(&*store, &investment, &BTreeSet::new(), &mut rng, now)?;
    let posted = count_postings(&payouts);
    let mut batch = Vec::with_capacity(payouts.len() + 1);
    batch.push(LedgerMutation::RecordInvestment {
        investment: investment.clone(),
    });
    batch.extend(payouts);
    store.apply_mutations(&batch, now)?;

    tracing::info!(
        investment_id = %investment.id,
        user_id,
        amount = investment.amount,
        commissions = posted,
        "confirmed deposit"
    );
    let commissions = store.commissions_for_investment(&investment.id)?;
    Ok(InvestmentReceipt {
        investment,
        commissions,
    })
}

/// Moves an active investment to `completed` or `cancelled`. Posted
/// commissions stay.
pub fn set_status<S: LedgerStore>(
    store: &mut S,
    investment_id: &str,
    status: InvestmentStatus,
    now: Timestamp,
) -> Result<Investment, ServiceError> {
    let current = store
        .investment(investment_id)?
        .ok_or_else(|| ServiceError::NotFound {
            entity: "investment",
            id: investment_id.to_string(),
        })?;
    if !current.status.can_become(status) {
        return Err(ServiceError::invalid(
            "status",
            format!("Investment is {:?} and cannot become {status:?}", current.status),
        ));
    }
    store.apply_mutations(
        &[LedgerMutation::SetInvestmentStatus {
            investment_id: investment_id.to_string(),
            status,
        }],
        now,
    )?;
    tracing::info!(investment_id, status = ?status, "investment status changed");
    Ok(Investment { status, ..current })
}

/// Newest first.
pub fn list_investments<S: LedgerStore>(
    store: &S,
    user_id: &str,
) -> Result<Vec<Investment>, ServiceError> {
    let mut rows = store.investments_by_user(user_id)?;
    rows.reverse();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}
