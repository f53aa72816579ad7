//! Endpoint handlers.
//!
//! Each handler runs one operation against the shared ledger and converts
//! the outcome into exactly one [`ApiResponse`]: a `success` envelope with
//! `data`, or an `error` envelope. No HTTP framework is involved; a server
//! mounts these by passing the `Authorization` header and decoded body.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    accounts::{self, RegisterRequest},
    ids,
    investments::{self, DepositRequest},
    ledger::{LedgerError, LedgerStore, SharedLedger},
    model::{InvestmentStatus, UserId},
    referral::{referral_network, CommissionCalculator},
    stats,
    withdrawals::{self, WithdrawalRequest},
    ErrorKind, ServiceConfig, ServiceError,
};

pub mod auth;

pub use auth::{bearer_token, AuthError, IdentityResolver, StaticTokens, TokenFileError};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_INTERNAL: u16 = 500;

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation => STATUS_BAD_REQUEST,
        ErrorKind::Unauthorized => STATUS_UNAUTHORIZED,
        ErrorKind::Forbidden => STATUS_FORBIDDEN,
        ErrorKind::NotFound => STATUS_NOT_FOUND,
        ErrorKind::Conflict => STATUS_CONFLICT,
        ErrorKind::Internal => STATUS_INTERNAL,
    }
}

/// Renders `err` as the error envelope for `operation` (e.g. "fetch
/// referral tree"). Unclassified faults are logged and reported as 500.
pub fn error_response(operation: &str, err: ServiceError) -> ApiResponse {
    let status = status_for(err.kind());
    let body = match err {
        ServiceError::Validation(errors) => json!({
            "status": "error",
            "message": "Validation failed",
            "errors": errors,
        }),
        ServiceError::Unauthorized(reason) => json!({
            "status": "error",
            "message": "Not authorized",
            "error": reason,
        }),
        other if status == STATUS_INTERNAL => {
            tracing::error!(operation, error = %other, "request failed");
            json!({
                "status": "error",
                "message": format!("Failed to {operation}"),
                "error": other.to_string(),
            })
        }
        other => json!({
            "status": "error",
            "message": other.to_string(),
        }),
    };
    ApiResponse { status, body }
}

fn success(status: u16, data: Map<String, Value>) -> ApiResponse {
    ApiResponse {
        status,
        body: json!({ "status": "success", "data": data }),
    }
}

/// `{ key: value }` as a data object.
fn named<T: Serialize>(key: &str, value: &T) -> Result<Map<String, Value>, ServiceError> {
    let mut map = Map::new();
    map.insert(key.to_string(), to_value(value)?);
    Ok(map)
}

/// The value itself as a data object; anything but a JSON object is an
/// internal fault.
fn flat<T: Serialize>(value: &T) -> Result<Map<String, Value>, ServiceError> {
    match to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(ServiceError::Ledger(LedgerError::Json(
            serde::ser::Error::custom("response data is not a JSON object"),
        ))),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Ledger(e.into()))
}

pub struct ReferralApi<S> {
    ledger: SharedLedger<S>,
    identity: Arc<dyn IdentityResolver>,
    config: ServiceConfig,
}

impl<S: LedgerStore> ReferralApi<S> {
    pub fn new(
        ledger: SharedLedger<S>,
        identity: impl IdentityResolver + 'static,
        config: ServiceConfig,
    ) -> Self {
        Self {
            ledger,
            identity: Arc::new(identity),
            config,
        }
    }

    pub fn ledger(&self) -> &SharedLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Gives the ledger back, e.g. to persist it after the request.
    pub fn into_ledger(self) -> SharedLedger<S> {
        self.ledger
    }

    fn authenticate(&self, authorization: Option<&str>) -> Result<UserId, ServiceError> {
        let token = bearer_token(authorization)?;
        let user_id = self.identity.resolve(token)?;
        let known = self.ledger.read(|store| {
            store
                .user(&user_id)
                .map(|u| u.is_some())
                .map_err(ServiceError::from)
        })?;
        if !known {
            return Err(ServiceError::Unauthorized(
                "user for this credential no longer exists".into(),
            ));
        }
        Ok(user_id)
    }

    fn respond(
        &self,
        operation: &str,
        status: u16,
        outcome: Result<Map<String, Value>, ServiceError>,
    ) -> ApiResponse {
        match outcome {
            Ok(data) => success(status, data),
            Err(err) => error_response(operation, err),
        }
    }

    /// `POST /auth/register`
    pub fn register(&self, request: RegisterRequest) -> ApiResponse {
        let outcome = self
            .ledger
            .write(|store| accounts::register(store, request, ids::now_secs()))
            .and_then(|user| named("user", &crate::model::Profile::from(&user)));
        self.respond("register user", STATUS_CREATED, outcome)
    }

    /// `GET /auth/profile`
    pub fn profile(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let profile = self
                .ledger
                .read(|store| accounts::profile(store, &user_id))?;
            named("user", &profile)
        });
        self.respond("fetch profile", STATUS_OK, outcome)
    }

    /// `GET /referrals/tree`
    pub fn referral_tree(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let network = self
                .ledger
                .read(|store| referral_network(store, &user_id))?;
            flat(&network)
        });
        self.respond("fetch referral tree", STATUS_OK, outcome)
    }

    /// `GET /referrals/commissions`
    pub fn commissions(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let history = self
                .ledger
                .read(|store| stats::commission_history(store, &user_id))?;
            flat(&history)
        });
        self.respond("fetch commissions", STATUS_OK, outcome)
    }

    /// `GET /referrals/stats`
    pub fn referral_stats(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let summary = self
                .ledger
                .read(|store| stats::referral_stats(store, &self.config, &user_id))?;
            named("stats", &summary)
        });
        self.respond("fetch referral stats", STATUS_OK, outcome)
    }

    /// `POST /investments/confirm`
    pub fn confirm_deposit(
        &self,
        authorization: Option<&str>,
        request: DepositRequest,
    ) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let receipt = self.ledger.write(|store| {
                investments::confirm_deposit(
                    store,
                    &self.config,
                    &user_id,
                    request,
                    ids::now_secs(),
                )
            })?;
            flat(&receipt)
        });
        self.respond("confirm deposit", STATUS_CREATED, outcome)
    }

    /// `GET /investments/user`
    pub fn investments(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let rows = self
                .ledger
                .read(|store| investments::list_investments(store, &user_id))?;
            named("investments", &rows)
        });
        self.respond("fetch investments", STATUS_OK, outcome)
    }

    /// `POST /withdrawals/request`
    pub fn request_withdrawal(
        &self,
        authorization: Option<&str>,
        request: WithdrawalRequest,
    ) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let withdrawal = self.ledger.write(|store| {
                withdrawals::request_withdrawal(
                    store,
                    &self.config,
                    &user_id,
                    request,
                    ids::now_secs(),
                )
            })?;
            named("withdrawal", &withdrawal)
        });
        self.respond("request withdrawal", STATUS_CREATED, outcome)
    }

    /// `GET /withdrawals/user`
    pub fn withdrawals(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let rows = self
                .ledger
                .read(|store| withdrawals::list_withdrawals(store, &user_id))?;
            named("withdrawals", &rows)
        });
        self.respond("fetch withdrawals", STATUS_OK, outcome)
    }

    /// `GET /withdrawals/check-eligibility`
    pub fn check_eligibility(&self, authorization: Option<&str>) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let eligibility = self
                .ledger
                .read(|store| withdrawals::check_eligibility(store, &self.config, &user_id))?;
            named("eligibility", &eligibility)
        });
        self.respond("check withdrawal eligibility", STATUS_OK, outcome)
    }

    /// `DELETE /withdrawals/:id`
    pub fn cancel_withdrawal(
        &self,
        authorization: Option<&str>,
        withdrawal_id: &str,
    ) -> ApiResponse {
        let outcome = self.authenticate(authorization).and_then(|user_id| {
            let withdrawal = self.ledger.write(|store| {
                withdrawals::cancel_withdrawal(store, &user_id, withdrawal_id, ids::now_secs())
            })?;
            named("withdrawal", &withdrawal)
        });
        self.respond("cancel withdrawal", STATUS_OK, outcome)
    }

    // Operator actions. These are not bearer-protected; mount them only on
    // a trusted surface.

    pub fn set_investment_status(
        &self,
        investment_id: &str,
        status: InvestmentStatus,
    ) -> ApiResponse {
        let outcome = self
            .ledger
            .write(|store| {
                investments::set_status(store, investment_id, status, ids::now_secs())
            })
            .and_then(|investment| named("investment", &investment));
        self.respond("update investment", STATUS_OK, outcome)
    }

    /// Posts any commission levels an investment is still missing.
    pub fn reprocess_investment(&self, investment_id: &str) -> ApiResponse {
        let outcome = self
            .ledger
            .write(|store| {
                CommissionCalculator::new(&self.config.schedule).process(
                    store,
                    investment_id,
                    ids::now_secs(),
                )
            })
            .and_then(|posting| flat(&posting));
        self.respond("process investment commissions", STATUS_OK, outcome)
    }

    pub fn complete_withdrawal(&self, withdrawal_id: &str) -> ApiResponse {
        let outcome = self
            .ledger
            .write(|store| {
                withdrawals::complete_withdrawal(store, withdrawal_id, ids::now_secs())
            })
            .and_then(|withdrawal| named("withdrawal", &withdrawal));
        self.respond("complete withdrawal", STATUS_OK, outcome)
    }
}
