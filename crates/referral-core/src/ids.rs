//! Identifier, referral-code and clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Uniform, Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::model::Timestamp;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const REFERRAL_CODE_LEN: usize = 8;

pub fn now_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// `<prefix>_<24 hex>`, e.g. `usr_3f9c…`.
pub fn record_id<R: RngCore>(rng: &mut R, prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rng.fill_bytes(&mut bytes);
    format!("{prefix}_{}", hex::encode(bytes))
}

fn random_code<R: Rng>(rng: &mut R, len: usize) -> String {
    let pick = Uniform::from(0..CODE_ALPHABET.len());
    (0..len)
        .map(|_| CODE_ALPHABET[rng.sample(pick)] as char)
        .collect()
}

pub fn referral_code<R: Rng>(rng: &mut R) -> String {
    random_code(rng, REFERRAL_CODE_LEN)
}

/// `<tag><unix millis><7 upper base-36 chars>`, e.g. `COM1700000000000K3J9QZ2`.
pub fn transaction_id<R: Rng>(rng: &mut R, tag: &str, millis: u128) -> String {
    format!("{tag}{millis}{}", random_code(rng, 7))
}

/// Salted SHA-256, stored as `sha256$<salt hex>$<digest hex>`.
pub fn password_digest<R: RngCore>(rng: &mut R, password: &str) -> String {
    let mut salt = [0u8; 16];
    rng.fill_bytes(&mut salt);
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    format!(
        "sha256${}${}",
        hex::encode(salt),
        hex::encode(hasher.finalize())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn referral_codes_use_upper_alphanumerics() {
        let mut rng = StdRng::seed_from_u64(7);
        let code = referral_code(&mut rng);
        assert_eq!(code.len(), REFERRAL_CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn transaction_ids_carry_tag_and_clock() {
        let mut rng = StdRng::seed_from_u64(1);
        let id = transaction_id(&mut rng, "COM", 1_700_000_000_123);
        assert!(id.starts_with("COM1700000000123"));
        assert_eq!(id.len(), 3 + 13 + 7);
    }

    #[test]
    fn password_digest_is_salted() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = password_digest(&mut rng, "hunter22");
        let b = password_digest(&mut rng, "hunter22");
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$"));
        assert!(!a.contains("hunter22"));
    }

    #[test]
    fn record_ids_are_prefixed() {
        let mut rng = StdRng::seed_from_u64(9);
        let id = record_id(&mut rng, "usr");
        assert!(id.starts_with("usr_"));
        assert_eq!(id.len(), 4 + 24);
    }
}
