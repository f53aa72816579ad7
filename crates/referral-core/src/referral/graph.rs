use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    ledger::{LedgerError, LedgerStore},
    model::{PublicUser, User, UserId},
    ServiceError,
};

/// Depth of the downline that is ever expanded; matches the commission depth.
pub const MAX_LEVELS: usize = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferralNode {
    #[serde(flatten)]
    pub user: PublicUser,
    pub level: u8,
    /// Present for levels 1 and 2 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PublicUser>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReferralTree {
    pub level1: Vec<ReferralNode>,
    pub level2: Vec<ReferralNode>,
    pub level3: Vec<ReferralNode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub total_referrals: usize,
    pub level1_count: usize,
    pub level2_count: usize,
    pub level3_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReferralNetwork {
    pub tree: ReferralTree,
    pub stats: TreeStats,
}

fn ids(users: &[User]) -> BTreeSet<UserId> {
    users.iter().map(|u| u.id.clone()).collect()
}

fn children_of(parent: &User, below: &[User]) -> Vec<PublicUser> {
    below
        .iter()
        .filter(|u| u.referred_by.as_deref() == Some(parent.id.as_str()))
        .map(PublicUser::from)
        .collect()
}

/// Resolves the three-level downline of `root`: level `n + 1` is exactly the
/// set of users whose referrer is in level `n`.
pub fn referral_network<S: LedgerStore>(
    store: &S,
    root: &str,
) -> Result<ReferralNetwork, ServiceError> {
    let root = store.user(root)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: root.to_string(),
    })?;

    let level1 = store.users_referred_by(&BTreeSet::from([root.id.clone()]))?;
    let level2 = store.users_referred_by(&ids(&level1))?;
    let level3 = store.users_referred_by(&ids(&level2))?;

    let stats = TreeStats {
        total_referrals: level1.len() + level2.len() + level3.len(),
        level1_count: level1.len(),
        level2_count: level2.len(),
        level3_count: level3.len(),
    };
    let tree = ReferralTree {
        level1: level1
            .iter()
            .map(|u| ReferralNode {
                user: PublicUser::from(u),
                level: 1,
                children: Some(children_of(u, &level2)),
            })
            .collect(),
        level2: level2
            .iter()
            .map(|u| ReferralNode {
                user: PublicUser::from(u),
                level: 2,
                children: Some(children_of(u, &level3)),
            })
            .collect(),
        level3: level3
            .iter()
            .map(|u| ReferralNode {
                user: PublicUser::from(u),
                level: 3,
                children: None,
            })
            .collect(),
    };
    tracing::debug!(
        user_id = %root.id,
        total = stats.total_referrals,
        "resolved referral network"
    );
    Ok(ReferralNetwork { tree, stats })
}

/// Upstream referrers of `user_id`, nearest first, at most `limit` long.
/// Stops early if an ancestor repeats.
pub fn upstream_chain<S: LedgerStore>(
    store: &S,
    user_id: &str,
    limit: usize,
) -> Result<Vec<User>, LedgerError> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::from([user_id.to_string()]);
    let mut node = store.require_user(user_id)?;
    while chain.len() < limit {
        let Some(parent_id) = node.referred_by.clone() else {
            break;
        };
        if !visited.insert(parent_id.clone()) {
            tracing::warn!(user_id, ancestor = %parent_id, "referral chain revisits an ancestor");
            break;
        }
        let parent = store.require_user(&parent_id)?;
        chain.push(parent.clone());
        node = parent;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, ledger::MemoryStore};

    #[test]
    fn builds_three_levels_and_cuts_off_below() {
        let mut store = MemoryStore::new();
        let root = fixtures::user(&mut store, "root", None);
        let a1 = fixtures::user(&mut store, "aa1", Some(&root));
        let a2 = fixtures::user(&mut store, "aa2", Some(&root));
        let b1 = fixtures::user(&mut store, "bb1", Some(&a1));
        let b2 = fixtures::user(&mut store, "bb2", Some(&a2));
        let c1 = fixtures::user(&mut store, "cc1", Some(&b1));
        fixtures::user(&mut store, "dd1", Some(&c1));
        fixtures::user(&mut store, "stranger", None);

        let network = referral_network(&store, &root.id).unwrap();
        let names = |nodes: &[ReferralNode]| {
            nodes
                .iter()
                .map(|n| n.user.username.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&network.tree.level1), vec!["aa1", "aa2"]);
        assert_eq!(names(&network.tree.level2), vec!["bb1", "bb2"]);
        assert_eq!(names(&network.tree.level3), vec!["cc1"]);
        assert_eq!(
            network.stats,
            TreeStats {
                total_referrals: 5,
                level1_count: 2,
                level2_count: 2,
                level3_count: 1,
            }
        );

        let a1_children = network.tree.level1[0].children.as_ref().unwrap();
        assert_eq!(a1_children.len(), 1);
        assert_eq!(a1_children[0].id, b1.id);
        let b2_children = network.tree.level2[1].children.as_ref().unwrap();
        assert!(b2_children.is_empty());
        assert_eq!(b2.referred_by.as_deref(), Some(a2.id.as_str()));
        assert!(network.tree.level3[0].children.is_none());
    }

    #[test]
    fn levels_follow_referrer_sets() {
        let mut store = MemoryStore::new();
        let root = fixtures::user(&mut store, "root", None);
        let mut frontier = vec![root.clone()];
        for depth in 0..3 {
            let mut next = Vec::new();
            for (i, parent) in frontier.iter().enumerate() {
                for j in 0..2 {
                    let name = format!("u{depth}_{i}_{j}");
                    next.push(fixtures::user(&mut store, &name, Some(parent)));
                }
            }
            frontier = next;
        }
        let network = referral_network(&store, &root.id).unwrap();
        let level1: BTreeSet<_> = network.tree.level1.iter().map(|n| n.user.id.clone()).collect();
        let level2: BTreeSet<_> = network.tree.level2.iter().map(|n| n.user.id.clone()).collect();
        assert!(network
            .tree
            .level2
            .iter()
            .all(|n| level1.contains(n.user.referred_by.as_ref().unwrap())));
        assert!(network
            .tree
            .level3
            .iter()
            .all(|n| level2.contains(n.user.referred_by.as_ref().unwrap())));
        assert_eq!(network.stats.level3_count, 8);
        assert_eq!(
            network.stats.total_referrals,
            network.stats.level1_count + network.stats.level2_count + network.stats.level3_count
        );
    }

    #[test]
    fn leaf_user_has_empty_levels() {
        let mut store = MemoryStore::new();
        let solo = fixtures::user(&mut store, "solo", None);
        let network = referral_network(&store, &solo.id).unwrap();
        assert_eq!(network.stats, TreeStats::default());
        assert!(network.tree.level1.is_empty());
    }

    #[test]
    fn unknown_root_is_not_found() {
        let store = MemoryStore::new();
        let err = referral_network(&store, "usr_missing").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[test]
    fn upstream_chain_respects_limit() {
        let mut store = MemoryStore::new();
        let a = fixtures::user(&mut store, "anna", None);
        let b = fixtures::user(&mut store, "bert", Some(&a));
        let c = fixtures::user(&mut store, "cleo", Some(&b));
        let d = fixtures::user(&mut store, "dana", Some(&c));
        let e = fixtures::user(&mut store, "emil", Some(&d));
        let chain = upstream_chain(&store, &e.id, MAX_LEVELS).unwrap();
        let ids: Vec<_> = chain.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec![d.id, c.id, b.id]);
        assert!(upstream_chain(&store, &a.id, MAX_LEVELS).unwrap().is_empty());
    }
}
