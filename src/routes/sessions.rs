use crate::auth::token_source::{ACCESS_TOKEN_COOKIE, LEGACY_TOKEN_COOKIE};
use crate::error::AppError;
use crate::middleware::credentials::Credential;
use crate::state::AppState;
use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

#[derive(Debug, Deserialize)]
pub struct IssueSessionRequest {
    #[serde(alias = "identityId")]
    pub identity_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueSessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Compares SHA-256 digests of both keys
fn internal_key_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(provided) => Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes()),
        None => false,
    }
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path("/");
    cookie.make_removal();
    cookie
}

/// Revoke the caller's credential. Any open gateway connection bound to it
/// is closed on its next frame or heartbeat.
///
/// **Endpoint**: `POST /api/sessions/logout`
#[post("/api/sessions/logout")]
pub async fn logout(
    state: web::Data<AppState>,
    credential: Credential,
) -> Result<HttpResponse, AppError> {
    state.authority.revoke(&credential.0).await?;
    tracing::info!("session logged out");

    Ok(HttpResponse::NoContent()
        .cookie(removal_cookie(ACCESS_TOKEN_COOKIE))
        .cookie(removal_cookie(LEGACY_TOKEN_COOKIE))
        .finish())
}

/// Credential issuance hook for the login collaborator. Disabled unless
/// `INTERNAL_API_KEY` is configured.
///
/// **Endpoint**: `POST /internal/sessions`
#[post("/internal/sessions")]
pub async fn issue_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    request: web::Json<IssueSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        return Ok(HttpResponse::NotFound().finish());
    };
    let provided = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if !internal_key_matches(provided, expected) {
        tracing::warn!("internal session request with wrong key");
        return Err(AppError::Unauthorized);
    }

    let identity_id = request.into_inner().identity_id;
    let identity = state
        .directory
        .find(identity_id)
        .await?
        .ok_or(AppError::IdentityNotFound(identity_id))?;

    let issued = state.authority.issue(&identity).await?;

    let mut cookie = Cookie::new(ACCESS_TOKEN_COOKIE, issued.token.clone());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::seconds(state.config.jwt_ttl_seconds));

    Ok(HttpResponse::Ok().cookie(cookie).json(IssueSessionResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}
