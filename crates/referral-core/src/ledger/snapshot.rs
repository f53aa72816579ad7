//! JSON snapshots of a [`MemoryStore`], sealed with a SHA-256 Merkle digest
//! over every record.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{LedgerError, LedgerEvent, MemoryStore, StoreMeta};
use crate::model::{Commission, Investment, User, Withdrawal};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub meta: StoreMeta,
    pub users: Vec<User>,
    pub investments: Vec<Investment>,
    pub commissions: Vec<Commission>,
    pub withdrawals: Vec<Withdrawal>,
    pub events: Vec<LedgerEvent>,
    /// Hex Merkle root over all of the above.
    pub digest: String,
}

impl LedgerSnapshot {
    pub fn compute_digest(&self) -> Result<[u8; 32], LedgerError> {
        let mut leaves: Vec<[u8; 32]> = Vec::new();
        leaves.push(leaf(b"meta", &self.meta)?);
        for user in &self.users {
            leaves.push(leaf(b"user", user)?);
        }
        for investment in &self.investments {
            leaves.push(leaf(b"investment", investment)?);
        }
        for commission in &self.commissions {
            leaves.push(leaf(b"commission", commission)?);
        }
        for withdrawal in &self.withdrawals {
            leaves.push(leaf(b"withdrawal", withdrawal)?);
        }
        for event in &self.events {
            leaves.push(leaf(b"event", event)?);
        }
        Ok(build_merkle(leaves))
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(LedgerError::UnsupportedVersion(self.version));
        }
        let actual = hex::encode(self.compute_digest()?);
        if actual != self.digest {
            return Err(LedgerError::IntegrityMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn leaf<T: Serialize>(tag: &[u8], record: &T) -> Result<[u8; 32], LedgerError> {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    hasher.update(serde_json::to_vec(record)?);
    Ok(hasher.finalize().into())
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"referral-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

impl MemoryStore {
    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut snapshot = LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            meta: self.meta.clone(),
            users: self.users.clone(),
            investments: self.investments.clone(),
            commissions: self.commissions.clone(),
            withdrawals: self.withdrawals.clone(),
            events: self.events.clone(),
            digest: String::new(),
        };
        snapshot.digest = hex::encode(snapshot.compute_digest()?);
        Ok(snapshot)
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        snapshot.verify()?;
        let mut store = MemoryStore::default();
        store.meta = snapshot.meta;
        store.users = snapshot.users;
        store.investments = snapshot.investments;
        store.commissions = snapshot.commissions;
        store.withdrawals = snapshot.withdrawals;
        store.events = snapshot.events;
        store.reindex()?;
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let bytes = fs::read(path)?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
        let store = Self::from_snapshot(snapshot)?;
        tracing::debug!(
            path = %path.display(),
            height = store.meta.height,
            "loaded ledger snapshot"
        );
        Ok(store)
    }

    /// A missing file is an empty ledger.
    pub fn load_or_default(path: &Path) -> Result<Self, LedgerError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes to a sibling temp file first and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let snapshot = self.snapshot()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = temp_sibling(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, ledger::LedgerStore};

    fn temp_path(tag: &str) -> PathBuf {
        let mut bytes = [0u8; 6];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        std::env::temp_dir().join(format!("referral-{tag}-{}.json", hex::encode(bytes)))
    }

    #[test]
    fn digest_is_deterministic() {
        let mut store = MemoryStore::new();
        let alice = fixtures::user(&mut store, "alice", None);
        fixtures::user(&mut store, "bob", Some(&alice));
        let a = store.snapshot().unwrap();
        let b = store.snapshot().unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn save_and_load_preserve_state() {
        let mut store = MemoryStore::new();
        let alice = fixtures::user(&mut store, "alice", None);
        let bob = fixtures::user(&mut store, "bob", Some(&alice));
        let path = temp_path("roundtrip");
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.meta(), store.meta());
        let reloaded_alice = loaded.require_user(&alice.id).unwrap();
        assert_eq!(reloaded_alice.direct_referrals, vec![bob.id.clone()]);
        assert_eq!(
            loaded
                .user_by_referral_code(&bob.referral_code)
                .unwrap()
                .map(|u| u.id),
            Some(bob.id)
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn tampered_snapshot_is_rejected() {
        let mut store = MemoryStore::new();
        fixtures::user(&mut store, "alice", None);
        let mut snapshot = store.snapshot().unwrap();
        snapshot.users[0].total_referral_earnings = 1_000_000;
        let err = MemoryStore::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, LedgerError::IntegrityMismatch { .. }));
    }

    #[test]
    fn missing_file_loads_empty() {
        let store = MemoryStore::load_or_default(&temp_path("missing")).unwrap();
        assert_eq!(store.meta().height, 0);
    }
}
