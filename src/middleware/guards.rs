//! Extractors that turn the credential middleware's output into handler
//! arguments. Missing identity is a 401 before the handler runs.

use super::credentials::Credential;
use crate::auth::Principal;
use crate::error::AppError;
use crate::models::Role;
use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
}

impl From<Principal> for User {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            display_name: principal.display_name,
            role: principal.role,
        }
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let principal = req.extensions().get::<Principal>().cloned();
        ready(
            principal
                .map(User::from)
                .ok_or_else(|| AppError::Unauthorized.into()),
        )
    }
}

impl FromRequest for Credential {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let credential = req.extensions().get::<Credential>().cloned();
        ready(credential.ok_or_else(|| AppError::Unauthorized.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_web::test]
    async fn user_requires_principal() {
        let req = TestRequest::default().to_http_request();
        let err = User::extract(&req).await.unwrap_err();
        assert_eq!(err.error_response().status(), 401);

        let id = Uuid::new_v4();
        req.extensions_mut().insert(Principal {
            id,
            display_name: "anon".into(),
            role: Role::User,
        });
        let user = User::extract(&req).await.unwrap();
        assert_eq!(user.id, id);
    }
}
