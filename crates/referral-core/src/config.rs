use serde::{Deserialize, Serialize};

use crate::{
    model::{Amount, CENTS_PER_DOLLAR},
    referral::CommissionSchedule,
};

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Knobs shared by the service operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base of the shareable registration link.
    pub frontend_url: String,
    pub minimum_investment: Amount,
    pub minimum_withdrawal: Amount,
    pub schedule: CommissionSchedule,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            minimum_investment: 5 * CENTS_PER_DOLLAR,
            minimum_withdrawal: 5 * CENTS_PER_DOLLAR,
            schedule: CommissionSchedule::default(),
        }
    }
}

impl ServiceConfig {
    pub fn with_frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into();
        self
    }

    pub fn referral_link(&self, code: &str) -> String {
        format!(
            "{}/register?ref={}",
            self.frontend_url.trim_end_matches('/'),
            code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_link_ignores_trailing_slash() {
        let config = ServiceConfig::default().with_frontend_url("https://app.example.com/");
        assert_eq!(
            config.referral_link("AB12CD34"),
            "https://app.example.com/register?ref=AB12CD34"
        );
    }
}
