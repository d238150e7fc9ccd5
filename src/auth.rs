//! Bearer-token identity resolution
//!
//! Credential issuance lives outside this server. The sync core only consumes
//! an already-verified (user, device) pair, so this module defines the
//! verification seam plus a static token-table implementation fed from
//! configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use crate::error::{AppError, Result};

/// Verified identity attached to every sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub device_id: String,
}

/// Token verification seam
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a bearer token to a verified identity, `None` if unknown.
    async fn verify(&self, token: &str) -> Result<Option<AuthUser>>;
}

/// Verifier backed by a fixed in-memory token table
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthUser>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, AuthUser>) -> Self {
        Self { tokens }
    }

    /// Parse a comma-separated `token:userId:deviceId` table.
    ///
    /// Malformed entries are skipped with a warning so a typo in one entry
    /// does not take down the rest of the table.
    pub fn from_spec(spec: &str) -> Self {
        let mut tokens = HashMap::new();

        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().filter(|t| !t.is_empty());
            let user_id = parts.next().and_then(|p| p.parse::<i64>().ok());
            let device_id = parts.next().filter(|d| !d.is_empty());

            match (token, user_id, device_id) {
                (Some(token), Some(user_id), Some(device_id)) => {
                    tokens.insert(
                        token.to_string(),
                        AuthUser {
                            user_id,
                            device_id: device_id.to_string(),
                        },
                    );
                }
                _ => {
                    tracing::warn!(entry = %entry, "Skipping malformed AUTH_TOKENS entry");
                }
            }
        }

        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<AuthUser>> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// Authenticate an HTTP request from its Authorization header.
///
/// Refuses the request before any sync state is touched.
pub async fn authenticate(verifier: &dyn TokenVerifier, headers: &HeaderMap) -> Result<AuthUser> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))?;

    verifier
        .verify(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
