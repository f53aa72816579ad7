//! Read-side summaries of a user's referral network and earnings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    ledger::{LedgerError, LedgerStore},
    model::{Amount, Commission, CommissionStatus, PublicUser, Timestamp, UserId},
    ServiceConfig, ServiceError,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub referral_code: String,
    pub total_referrals: usize,
    /// Direct referrals holding at least one active investment.
    pub active_referrals: usize,
    pub total_referral_earnings: Amount,
    pub direct_sales: Amount,
    pub weekly_salary: Amount,
    pub referral_link: String,
}

pub fn referral_stats<S: LedgerStore>(
    store: &S,
    config: &ServiceConfig,
    user_id: &str,
) -> Result<ReferralStats, ServiceError> {
    let user = store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;
    let direct: BTreeSet<UserId> = user.direct_referrals.iter().cloned().collect();
    let active = store.active_investment_totals(&direct)?;
    Ok(ReferralStats {
        referral_link: config.referral_link(&user.referral_code),
        referral_code: user.referral_code,
        total_referrals: user.direct_referrals.len(),
        active_referrals: active.len(),
        total_referral_earnings: user.total_referral_earnings,
        direct_sales: user.direct_sales,
        weekly_salary: user.weekly_salary,
    })
}

/// Investment fields joined onto a commission row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRef {
    pub id: String,
    pub amount: Amount,
    pub transaction_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionView {
    pub transaction_id: String,
    pub level: u8,
    pub rate_bps: u32,
    pub investment_amount: Amount,
    pub commission_amount: Amount,
    pub status: CommissionStatus,
    pub created_at: Timestamp,
    /// `None` if the triggering user vanished from the store.
    pub from_user: Option<PublicUser>,
    pub investment: Option<InvestmentRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommissionStats {
    pub total: usize,
    pub total_earned: Amount,
    pub level1_earnings: Amount,
    pub level2_earnings: Amount,
    pub level3_earnings: Amount,
}

impl CommissionStats {
    /// Fails instead of wrapping; the store keeps each earner's total within
    /// range, so this only trips on rows from more than one earner.
    pub fn from_rows(rows: &[Commission]) -> Result<Self, LedgerError> {
        let mut stats = CommissionStats {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            let add = |sum: Amount, field: &'static str| {
                sum.checked_add(row.commission_amount)
                    .ok_or_else(|| LedgerError::AmountOverflow {
                        user_id: row.user_id.clone(),
                        field,
                    })
            };
            stats.total_earned = add(stats.total_earned, "totalEarned")?;
            match row.level {
                1 => stats.level1_earnings = add(stats.level1_earnings, "level1Earnings")?,
                2 => stats.level2_earnings = add(stats.level2_earnings, "level2Earnings")?,
                3 => stats.level3_earnings = add(stats.level3_earnings, "level3Earnings")?,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionHistory {
    pub commissions: Vec<CommissionView>,
    pub stats: CommissionStats,
}

/// Commissions earned by `user_id`, newest first.
pub fn commission_history<S: LedgerStore>(
    store: &S,
    user_id: &str,
) -> Result<CommissionHistory, ServiceError> {
    store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;
    let mut rows = store.commissions_earned_by(user_id)?;
    rows.reverse();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let stats = CommissionStats::from_rows(&rows)?;
    let mut commissions = Vec::with_capacity(rows.len());
    for row in rows {
        let from_user = store.user(&row.from_user_id)?.as_ref().map(PublicUser::from);
        let investment = store.investment(&row.investment_id)?.map(|i| InvestmentRef {
            id: i.id,
            amount: i.amount,
            transaction_id: i.transaction_id,
        });
        commissions.push(CommissionView {
            transaction_id: row.transaction_id,
            level: row.level,
            rate_bps: row.rate_bps,
            investment_amount: row.investment_amount,
            commission_amount: row.commission_amount,
            status: row.status,
            created_at: row.created_at,
            from_user,
            investment,
        });
    }
    Ok(CommissionHistory { commissions, stats })
}
