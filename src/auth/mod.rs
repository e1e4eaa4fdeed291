//! Credential Authority: issues, validates and revokes bearer credentials
//! and keeps at most one active session per identity.

pub mod session_store;
pub mod token_source;

use crate::error::{AppError, AppResult};
use crate::models::{Identity, Role};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use session_store::{MemorySessionStore, RedisSessionStore, RevocationReason, SessionStore};

const VALIDATION_LEEWAY_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: String,
    /// Display name at issue time
    pub name: String,
    /// Role claim, e.g. `ROLE_USER`
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id so two credentials minted in the same second differ
    pub jti: String,
}

/// Identity resolved from a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a credential did not verify. Callers treat every variant as
/// "unauthenticated"; the distinction is only for logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential expired")]
    Expired,
    #[error("credential signature mismatch")]
    BadSignature,
    #[error("malformed credential: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for CredentialError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => CredentialError::Expired,
            ErrorKind::InvalidSignature => CredentialError::BadSignature,
            _ => CredentialError::Malformed(e.to_string()),
        }
    }
}

/// SHA-256 hex of the raw token, the key of its revocation record
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct CredentialAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
    sessions: Arc<dyn SessionStore>,
}

impl CredentialAuthority {
    pub fn new(secret: &[u8], ttl_secs: i64, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
            sessions,
        }
    }

    fn validation(check_expiry: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = VALIDATION_LEEWAY_SECS;
        validation.validate_exp = check_expiry;
        validation
    }

    fn decode_claims(&self, token: &str, check_expiry: bool) -> Result<Claims, CredentialError> {
        let data = decode::<Claims>(token, &self.decoding, &Self::validation(check_expiry))?;
        Ok(data.claims)
    }

    /// Mint a credential and make it the identity's only active session.
    /// Whatever credential was active before is revoked immediately.
    pub async fn issue(&self, identity: &Identity) -> AppResult<IssuedCredential> {
        let now = Utc::now();
        if identity.is_currently_suspended(now) {
            warn!(identity_id = %identity.id, "refusing credential for suspended identity");
            return Err(AppError::Suspended);
        }

        let expires_at = now + chrono::Duration::seconds(self.ttl_secs);
        let claims = Claims {
            sub: identity.id.to_string(),
            name: identity.display_name.clone(),
            role: identity.role.as_claim().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| {
                tracing::error!(error = %e, "failed to sign credential");
                AppError::Internal
            })?;

        let previous = self
            .sessions
            .replace_active(identity.id, &token, self.ttl_secs as u64)
            .await?;

        if let Some(previous) = previous.filter(|p| p != &token) {
            self.revoke_with_reason(&previous, RevocationReason::Superseded)
                .await?;
            info!(identity_id = %identity.id, "previous session superseded");
        }

        Ok(IssuedCredential { token, expires_at })
    }

    /// Signature and expiry check only. Revocation is not consulted.
    pub fn validate(&self, token: &str) -> Result<Principal, CredentialError> {
        let claims = self.decode_claims(token, true)?;
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|e| CredentialError::Malformed(format!("subject: {e}")))?;
        let role = Role::from_claim(&claims.role)
            .ok_or_else(|| CredentialError::Malformed(format!("role: {}", claims.role)))?;
        Ok(Principal {
            id,
            display_name: claims.name,
            role,
        })
    }

    /// Explicit logout
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        self.revoke_with_reason(token, RevocationReason::Logout)
            .await?;

        if let Ok(claims) = self.decode_claims(token, false) {
            if let Ok(id) = Uuid::parse_str(&claims.sub) {
                self.sessions.clear_active(id, token).await?;
            }
        }
        Ok(())
    }

    async fn revoke_with_reason(&self, token: &str, reason: RevocationReason) -> AppResult<()> {
        let claims = match self.decode_claims(token, false) {
            Ok(claims) => claims,
            Err(e) => {
                // Unverifiable tokens are already rejected everywhere
                debug!(error = %e, "not recording revocation for unverifiable token");
                return Ok(());
            }
        };

        // validate() still accepts the token for the leeway past `exp`
        let remaining = claims.exp - Utc::now().timestamp() + VALIDATION_LEEWAY_SECS as i64;
        if remaining <= 0 {
            return Ok(());
        }

        self.sessions
            .record_revocation(&token_fingerprint(token), reason, remaining as u64)
            .await
    }

    pub async fn is_revoked(&self, token: &str) -> AppResult<bool> {
        self.sessions.is_revoked(&token_fingerprint(token)).await
    }

    /// Validate plus revocation. `Ok(None)` means unauthenticated; `Err` only
    /// when the revocation store is unreachable.
    pub async fn authenticate(&self, token: &str) -> AppResult<Option<Principal>> {
        let principal = match self.validate(token) {
            Ok(principal) => principal,
            Err(e) => {
                debug!(error = %e, "credential rejected");
                return Ok(None);
            }
        };

        if self.is_revoked(token).await? {
            debug!(identity_id = %principal.id, "credential revoked");
            return Ok(None);
        }

        Ok(Some(principal))
    }
}
