pub mod credentials;
pub mod error_handling;
pub mod guards;
pub mod request_id;

pub use credentials::{Credential, CredentialMiddleware};
pub use guards::User;
pub use request_id::RequestIdMiddleware;
