//! Locating the bearer credential on an incoming request.
//!
//! Priority: `Authorization: Bearer`, then the auth cookies, then the custom
//! `token` header. First non-empty match wins.

use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Cookie name used by older web clients
pub const LEGACY_TOKEN_COOKIE: &str = "jwt_token";
pub const TOKEN_HEADER: &str = "token";

/// Where a credential was found, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    AuthorizationHeader,
    Cookie,
    CustomHeader,
    QueryParameter,
}

pub fn resolve_credential(req: &HttpRequest) -> Option<(String, CredentialSource)> {
    bearer_header(req)
        .map(|t| (t, CredentialSource::AuthorizationHeader))
        .or_else(|| auth_cookie(req).map(|t| (t, CredentialSource::Cookie)))
        .or_else(|| custom_header(req).map(|t| (t, CredentialSource::CustomHeader)))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn bearer_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .and_then(non_empty)
}

fn auth_cookie(req: &HttpRequest) -> Option<String> {
    [ACCESS_TOKEN_COOKIE, LEGACY_TOKEN_COOKIE]
        .iter()
        .filter_map(|name| req.cookie(name))
        .find_map(|cookie| non_empty(cookie.value()))
}

fn custom_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
}
