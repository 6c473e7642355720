use axum::{
    body::Bytes,
    extract::{FromRequest, OriginalUri, Request},
    http::{Method, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use super::helpers::{AuthError, Authorizer, Owner, RequestToVerify};
use crate::server::response::ApiError;

/// A request whose body has been buffered so its signature can be checked.
///
/// Extracting this does not authenticate anything; handlers call
/// [`SignedRequest::authorize`] once they know which repository the request
/// targets.
pub struct SignedRequest {
    pub method: Method,
    pub path_and_query: String,
    pub authorization: Option<String>,
    pub body: Bytes,
}

impl SignedRequest {
    pub fn authorize(&self, authorizer: &Authorizer, repository: &str) -> Result<Owner, AuthError> {
        let request = RequestToVerify {
            method: self.method.as_str(),
            path_and_query: &self.path_and_query,
            authorization: self.authorization.as_deref(),
            body: &self.body,
        };
        let result = authorizer.authorize(&request, repository);
        if let Err(e) = &result {
            tracing::debug!(repository, reason = e.message(), "Rejected request signature");
        }
        result
    }

    /// Parses the buffered body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl<S: Send + Sync> FromRequest<S> for SignedRequest {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        // Nested routers see a stripped URI; the client signed the full one.
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map_or_else(|| parts.uri.clone(), |original| original.0.clone());
        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

        let authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let method = parts.method.clone();

        let body = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(SignedRequest {
            method,
            path_and_query,
            authorization,
            body,
        })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
