use std::collections::{HashMap, HashSet};

use super::signature::{signing_message, verify};
use crate::config::GatewayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    UnknownKey,
    UnknownRepository,
    RepositoryNotAllowed,
    BadSignature,
}

impl AuthError {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            AuthError::MissingAuth => "Authentication required",
            AuthError::InvalidScheme => "Malformed authorization header",
            AuthError::UnknownKey => "Unknown key",
            AuthError::UnknownRepository => "Unknown repository",
            AuthError::RepositoryNotAllowed => "Key is not authorized for this repository",
            AuthError::BadSignature => "Invalid request signature",
        }
    }
}

/// The authenticated identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The parts of an inbound request that a signature covers.
#[derive(Debug, Clone)]
pub struct RequestToVerify<'a> {
    pub method: &'a str,
    pub path_and_query: &'a str,
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

/// Splits `"<key_id> <signature>"`.
pub fn parse_authorization(header: &str) -> Result<(&str, &str), AuthError> {
    let (key_id, signature) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidScheme)?;
    let signature = signature.trim();
    if key_id.is_empty() || signature.is_empty() || signature.contains(' ') {
        return Err(AuthError::InvalidScheme);
    }
    Ok((key_id, signature))
}

struct KeyEntry {
    secret: String,
    repositories: HashSet<String>,
}

/// Verifies request signatures against the per-repository keys.
///
/// Built once from the configuration; holds no mutable state.
pub struct Authorizer {
    keys: HashMap<String, KeyEntry>,
    repositories: HashSet<String>,
}

impl Authorizer {
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut keys: HashMap<String, KeyEntry> = HashMap::new();
        for (name, repo) in &config.repositories {
            for key in &repo.keys {
                keys.entry(key.id.clone())
                    .or_insert_with(|| KeyEntry {
                        secret: key.secret.clone(),
                        repositories: HashSet::new(),
                    })
                    .repositories
                    .insert(name.clone());
            }
        }
        Self {
            keys,
            repositories: config.repositories.keys().cloned().collect(),
        }
    }

    /// Returns the caller's identity if the request is signed by a key bound to `repository`.
    pub fn authorize(&self, request: &RequestToVerify<'_>, repository: &str) -> Result<Owner, AuthError> {
        let header = request.authorization.ok_or(AuthError::MissingAuth)?;
        let (key_id, signature) = parse_authorization(header)?;

        if !self.repositories.contains(repository) {
            return Err(AuthError::UnknownRepository);
        }
        let key = self.keys.get(key_id).ok_or(AuthError::UnknownKey)?;
        if !key.repositories.contains(repository) {
            return Err(AuthError::RepositoryNotAllowed);
        }

        let message = signing_message(request.method, request.path_and_query, request.body);
        if !verify(key.secret.as_bytes(), &message, signature) {
            return Err(AuthError::BadSignature);
        }

        Ok(Owner(key_id.to_string()))
    }
}
