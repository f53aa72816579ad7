//! Registration and profile reads.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    ids,
    ledger::{LedgerError, LedgerStore},
    model::{Balance, Profile, Timestamp, User},
    validation::{is_email, is_username, Validator},
    ServiceError,
};

const REFERRAL_CODE_ATTEMPTS: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

fn allocate_referral_code<S: LedgerStore, R: Rng>(
    store: &S,
    rng: &mut R,
) -> Result<String, ServiceError> {
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let code = ids::referral_code(rng);
        if store.user_by_referral_code(&code)?.is_none() {
            return Ok(code);
        }
    }
    Err(ServiceError::Conflict(
        "could not allocate a unique referral code".into(),
    ))
}

/// Validates `request` and creates the user, linking it under the owner of
/// the referral code when one is given.
pub fn register<S: LedgerStore>(
    store: &mut S,
    request: RegisterRequest,
    now: Timestamp,
) -> Result<User, ServiceError> {
    let username = request.username.trim();
    let email = request.email.trim().to_lowercase();
    let full_name = request.full_name.trim();
    let code = request
        .referral_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let mut v = Validator::new();
    v.check(
        username.chars().count() >= 3,
        "username",
        "Username must be at least 3 characters",
    )
    .check(
        is_username(username),
        "username",
        "Username can only contain letters, numbers, and underscores",
    )
    .check(is_email(&email), "email", "Please provide a valid email")
    .check(
        request.password.chars().count() >= 6,
        "password",
        "Password must be at least 6 characters",
    )
    .check(!full_name.is_empty(), "fullName", "Full name is required");

    let referrer = match code {
        Some(code) => {
            let found = store.user_by_referral_code(code)?;
            if found.is_none() {
                v.reject("referralCode", "Invalid referral code");
            }
            found
        }
        None => None,
    };
    v.finish()?;

    let mut rng = rand::thread_rng();
    let user = User {
        id: ids::record_id(&mut rng, "usr"),
        username: username.to_string(),
        email,
        full_name: full_name.to_string(),
        password_digest: ids::password_digest(&mut rng, &request.password),
        referral_code: allocate_referral_code(&*store, &mut rng)?,
        referred_by: referrer.map(|r| r.id),
        direct_referrals: Vec::new(),
        direct_sales: 0,
        total_referral_earnings: 0,
        weekly_salary: 0,
        balance: Balance::default(),
        created_at: now,
    };
    let id = user.id.clone();
    store.insert_user(user, now).map_err(|err| match err {
        LedgerError::Conflict { field, .. } => {
            ServiceError::Conflict(format!("This {field} is already registered"))
        }
        other => other.into(),
    })?;

    let user = store.require_user(&id)?;
    tracing::info!(
        user_id = %user.id,
        referred_by = ?user.referred_by,
        "registered user"
    );
    Ok(user)
}

pub fn profile<S: LedgerStore>(store: &S, user_id: &str) -> Result<Profile, ServiceError> {
    let user = store.user(user_id)?.ok_or_else(|| ServiceError::NotFound {
        entity: "user",
        id: user_id.to_string(),
    })?;
    Ok(Profile::from(&user))
}
