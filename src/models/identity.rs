use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_AVATAR: &str = "/profiles/default_profile.png";
const AVATAR_PREFIX: &str = "/profiles/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    /// Value carried in the credential's `role` claim
    pub fn as_claim(&self) -> &'static str {
        match self {
            Role::Guest => "ROLE_GUEST",
            Role::User => "ROLE_USER",
            Role::Admin => "ROLE_ADMIN",
        }
    }

    pub fn from_claim(claim: &str) -> Option<Self> {
        match claim {
            "ROLE_GUEST" => Some(Role::Guest),
            "ROLE_USER" => Some(Role::User),
            "ROLE_ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Parse the `role` column; unknown values fall back to `User`
    pub fn from_db(value: &str) -> Self {
        match value.to_ascii_uppercase().trim_start_matches("ROLE_") {
            "GUEST" => Role::Guest,
            "ADMIN" => Role::Admin,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suspension {
    None,
    Until(DateTime<Utc>),
    Permanent,
}

impl Suspension {
    /// Build from the `is_suspended` / `suspended_until` column pair.
    /// A suspended row without an end date is permanent.
    pub fn from_columns(is_suspended: bool, until: Option<DateTime<Utc>>) -> Self {
        match (is_suspended, until) {
            (false, _) => Suspension::None,
            (true, Some(end)) => Suspension::Until(end),
            (true, None) => Suspension::Permanent,
        }
    }
}

/// A board member as seen by the chat core. Owned by user management;
/// read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub suspension: Suspension,
}

impl Identity {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar: None,
            role: Role::User,
            suspension: Suspension::None,
        }
    }

    pub fn is_currently_suspended(&self, now: DateTime<Utc>) -> bool {
        match self.suspension {
            Suspension::None => false,
            Suspension::Permanent => true,
            Suspension::Until(end) => end > now,
        }
    }

    /// Avatar reference as clients should render it
    pub fn avatar_url(&self) -> String {
        normalize_avatar(self.avatar.as_deref())
    }
}

pub fn normalize_avatar(avatar: Option<&str>) -> String {
    match avatar.map(str::trim).filter(|a| !a.is_empty()) {
        None => DEFAULT_AVATAR.to_string(),
        Some(a) if a.starts_with(AVATAR_PREFIX) || a.starts_with("http") => a.to_string(),
        Some(a) => format!("{AVATAR_PREFIX}{}", a.trim_start_matches('/')),
    }
}
