mod helpers;
mod middleware;
pub mod signature;

pub use helpers::{AuthError, Authorizer, Owner, RequestToVerify, parse_authorization};
pub use middleware::SignedRequest;
pub use signature::authorization_header;
