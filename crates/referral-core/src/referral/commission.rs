use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::graph::{upstream_chain, MAX_LEVELS};
use crate::{
    ids,
    ledger::{LedgerError, LedgerMutation, LedgerStore},
    model::{Amount, Commission, CommissionStatus, Investment, InvestmentStatus, Timestamp},
    ServiceError,
};

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Per-level rates in basis points, index 0 being the direct referrer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionSchedule {
    pub levels_bps: Vec<u32>,
}

impl Default for CommissionSchedule {
    /// 12% / 2% / 1%.
    fn default() -> Self {
        Self {
            levels_bps: vec![1_200, 200, 100],
        }
    }
}

impl CommissionSchedule {
    pub fn max_depth(&self) -> usize {
        self.levels_bps.len().min(MAX_LEVELS)
    }

    pub fn rate_bps(&self, level: u8) -> Option<u32> {
        if level == 0 || level as usize > self.max_depth() {
            return None;
        }
        self.levels_bps.get(level as usize - 1).copied()
    }

    /// Floors to whole minor units.
    pub fn commission_for(&self, level: u8, amount: Amount) -> Amount {
        match self.rate_bps(level) {
            Some(bps) => (amount as u128 * bps as u128 / BPS_DENOMINATOR as u128) as Amount,
            None => 0,
        }
    }
}

/// Result of posting one investment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionPosting {
    pub investment_id: String,
    /// Every commission row of the investment, level order.
    pub commissions: Vec<Commission>,
    /// How many of those were written by this call.
    pub newly_posted: usize,
}

pub struct CommissionCalculator<'a> {
    schedule: &'a CommissionSchedule,
}

impl<'a> CommissionCalculator<'a> {
    pub fn new(schedule: &'a CommissionSchedule) -> Self {
        Self { schedule }
    }

    /// Builds the mutations that pay `investment`'s upstream chain, skipping
    /// levels listed in `already_posted`. The level-1 referrer is also
    /// credited with the sale.
    pub fn plan<S: LedgerStore, R: Rng>(
        &self,
        store: &S,
        investment: &Investment,
        already_posted: &BTreeSet<u8>,
        rng: &mut R,
        now: Timestamp,
    ) -> Result<Vec<LedgerMutation>, LedgerError> {
        if investment.amount == 0 {
            return Ok(Vec::new());
        }
        let chain = upstream_chain(store, &investment.user_id, self.schedule.max_depth())?;
        let millis = ids::now_millis();
        let mut mutations = Vec::new();
        for (idx, earner) in chain.iter().enumerate() {
            let level = (idx + 1) as u8;
            if already_posted.contains(&level) {
                continue;
            }
            let rate_bps = match self.schedule.rate_bps(level) {
                Some(bps) => bps,
                None => break,
            };
            mutations.push(LedgerMutation::PostCommission {
                commission: Commission {
                    transaction_id: ids::transaction_id(rng, "COM", millis),
                    user_id: earner.id.clone(),
                    from_user_id: investment.user_id.clone(),
                    investment_id: investment.id.clone(),
                    level,
                    rate_bps,
                    investment_amount: investment.amount,
                    commission_amount: self.schedule.commission_for(level, investment.amount),
                    status: CommissionStatus::Paid,
                    created_at: now,
                },
            });
            if level == 1 {
                mutations.push(LedgerMutation::CreditDirectSales {
                    user_id: earner.id.clone(),
                    amount: investment.amount,
                });
            }
        }
        Ok(mutations)
    }

    /// Posts any missing commission levels for a stored, active investment.
    /// Running it again for the same investment writes nothing.
    pub fn process<S: LedgerStore>(
        &self,
        store: &mut S,
        investment_id: &str,
        now: Timestamp,
    ) -> Result<CommissionPosting, ServiceError> {
        let investment = store
            .investment(investment_id)?
            .ok_or_else(|| ServiceError::NotFound {
                entity: "investment",
                id: investment_id.to_string(),
            })?;
        if investment.status != InvestmentStatus::Active {
            return Err(ServiceError::invalid(
                "investmentId",
                "Only active investments pay commissions",
            ));
        }
        let posted: BTreeSet<u8> = store
            .commissions_for_investment(investment_id)?
            .iter()
            .map(|c| c.level)
            .collect();
        let mutations = self.plan(&*store, &investment, &posted, &mut rand::thread_rng(), now)?;
        let newly_posted = count_postings(&mutations);
        if newly_posted > 0 {
            store.apply_mutations(&mutations, now)?;
            tracing::info!(
                investment_id,
                user_id = %investment.user_id,
                newly_posted,
                "posted referral commissions"
            );
        } else {
            tracing::debug!(investment_id, "no commission levels left to post");
        }
        Ok(CommissionPosting {
            investment_id: investment_id.to_string(),
            commissions: store.commissions_for_investment(investment_id)?,
            newly_posted,
        })
    }
}

pub(crate) fn count_postings(mutations: &[LedgerMutation]) -> usize {
    mutations
        .iter()
        .filter(|m| matches!(m, LedgerMutation::PostCommission { .. }))
        .count()
}
