//! Bearer credential resolution. Issuing credentials happens elsewhere; this
//! side only maps a presented token to a user id.

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{model::UserId, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer credential supplied")]
    Missing,
    #[error("malformed authorization header")]
    Malformed,
    #[error("credential not recognised")]
    Unknown,
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Unauthorized(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenFileError {
    #[error("cannot read token file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse token file: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let Some(header) = header else {
        return Err(AuthError::Missing);
    };
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::Malformed)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}

/// Fixed token table, typically loaded from a JSON object of
/// `token -> user id`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StaticTokens {
    tokens: BTreeMap<String, UserId>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn from_file(path: &Path) -> Result<Self, TokenFileError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// A missing file yields an empty table.
    pub fn from_file_or_empty(path: &Path) -> Result<Self, TokenFileError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

impl IdentityResolver for StaticTokens {
    fn resolve(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::Unknown)
    }
}
