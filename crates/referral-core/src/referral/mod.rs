//! Referral forest reads and commission posting.

mod commission;
mod graph;

pub use commission::{
    CommissionCalculator, CommissionPosting, CommissionSchedule, BPS_DENOMINATOR,
};
pub(crate) use commission::count_postings;
pub use graph::{
    referral_network, upstream_chain, ReferralNetwork, ReferralNode, ReferralTree, TreeStats,
    MAX_LEVELS,
};
