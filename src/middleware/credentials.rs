use crate::auth::token_source::resolve_credential;
use crate::auth::CredentialAuthority;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

/// Raw credential of an authenticated request, kept so logout can revoke it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(pub String);

/// Resolves the request credential and, when it verifies and is not
/// revoked, stores the [`crate::auth::Principal`] and [`Credential`] in
/// request extensions. Never rejects by itself; handlers that need an
/// identity use the [`super::guards::User`] extractor.
pub struct CredentialMiddleware {
    authority: Arc<CredentialAuthority>,
}

impl CredentialMiddleware {
    pub fn new(authority: Arc<CredentialAuthority>) -> Self {
        Self { authority }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CredentialMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = CredentialMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CredentialMiddlewareService {
            service: Rc::new(service),
            authority: self.authority.clone(),
        }))
    }
}

pub struct CredentialMiddlewareService<S> {
    service: Rc<S>,
    authority: Arc<CredentialAuthority>,
}

impl<S, B> Service<ServiceRequest> for CredentialMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let authority = self.authority.clone();

        Box::pin(async move {
            if let Some((token, source)) = resolve_credential(req.request()) {
                // Revocation lookup failing is fatal to the request
                match authority.authenticate(&token).await? {
                    Some(principal) => {
                        tracing::debug!(identity_id = %principal.id, ?source, "request authenticated");
                        req.extensions_mut().insert(principal);
                        req.extensions_mut().insert(Credential(token));
                    }
                    None => {
                        tracing::debug!(?source, "request credential not accepted");
                    }
                }
            }

            service.call(req).await
        })
    }
}
