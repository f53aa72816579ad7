use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type InvestmentId = String;
pub type WithdrawalId = String;
pub type Amount = u64;
pub type Timestamp = u64;

pub const CENTS_PER_DOLLAR: Amount = 100; // $1 = 100 minor units

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Balance {
    pub available: Amount,
    pub locked: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_digest: String,
    pub referral_code: String,
    /// Upstream referrer. Written once, at registration.
    pub referred_by: Option<UserId>,
    pub direct_referrals: Vec<UserId>,
    pub direct_sales: Amount,
    pub total_referral_earnings: Amount,
    pub weekly_salary: Amount,
    pub balance: Balance,
    pub created_at: Timestamp,
}

/// Projection of a [`User`] that is safe to hand to other users.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub referred_by: Option<UserId>,
    pub direct_sales: Amount,
    pub total_referral_earnings: Amount,
    pub created_at: Timestamp,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            referred_by: user.referred_by.clone(),
            direct_sales: user.direct_sales,
            total_referral_earnings: user.total_referral_earnings,
            created_at: user.created_at,
        }
    }
}

/// The owner's own view: public fields plus code, counters and balance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: PublicUser,
    pub referral_code: String,
    pub direct_referrals: usize,
    pub weekly_salary: Amount,
    pub balance: Balance,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            user: PublicUser::from(user),
            referral_code: user.referral_code.clone(),
            direct_referrals: user.direct_referrals.len(),
            weekly_salary: user.weekly_salary,
            balance: user.balance.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl InvestmentStatus {
    pub fn can_become(self, next: InvestmentStatus) -> bool {
        matches!(
            (self, next),
            (InvestmentStatus::Active, InvestmentStatus::Completed)
                | (InvestmentStatus::Active, InvestmentStatus::Cancelled)
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Crypto,
    Bank,
    Card,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: InvestmentStatus,
    pub transaction_id: String,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_hash: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    #[default]
    Paid,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub transaction_id: String,
    /// Earner.
    pub user_id: UserId,
    /// The downstream user whose investment triggered the payout.
    pub from_user_id: UserId,
    pub investment_id: InvestmentId,
    pub level: u8,
    pub rate_bps: u32,
    pub investment_amount: Amount,
    pub commission_amount: Amount,
    #[serde(default)]
    pub status: CommissionStatus,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Amount,
    pub wallet_address: String,
    pub status: WithdrawalStatus,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_investments_transition() {
        use InvestmentStatus::*;
        assert!(Active.can_become(Completed));
        assert!(Active.can_become(Cancelled));
        assert!(!Completed.can_become(Active));
        assert!(!Cancelled.can_become(Completed));
        assert!(!Active.can_become(Active));
    }

    #[test]
    fn public_projection_hides_credentials() {
        let user = User {
            id: "usr_1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            password_digest: "sha256$00$00".into(),
            referral_code: "ABCDEFGH".into(),
            referred_by: None,
            direct_referrals: vec![],
            direct_sales: 0,
            total_referral_earnings: 0,
            weekly_salary: 0,
            balance: Balance::default(),
            created_at: 1,
        };
        let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert!(json.get("passwordDigest").is_none());
        assert!(json.get("referralCode").is_none());
        assert_eq!(json["fullName"], "Alice");
    }
}
