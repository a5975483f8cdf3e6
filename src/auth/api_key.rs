//! API key authentication
//!
//! Keys are compared by SHA-256 digest; plaintext keys are not kept.

use std::collections::HashSet;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

use super::{Access, AccessPolicy, AuthError};

/// Policy granting read and write to holders of a configured key
#[derive(Debug, Clone, Default)]
pub struct ApiKeyPolicy {
    key_hashes: HashSet<String>,
}

impl ApiKeyPolicy {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            key_hashes: keys
                .into_iter()
                .map(|k| Self::hash_key(k.as_ref()))
                .collect(),
        }
    }

    /// Hash an API key for comparison
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Extract the presented key from an `Authorization` header value
    fn presented_key(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("ApiKey "))
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn validate(&self, key: &str) -> Result<(), AuthError> {
        if self.key_hashes.contains(&Self::hash_key(key)) {
            Ok(())
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }
}

impl AccessPolicy for ApiKeyPolicy {
    fn authorize(&self, headers: &HeaderMap, _access: Access) -> Result<(), AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingAuth)?;
        let key = Self::presented_key(header).ok_or(AuthError::MissingAuth)?;
        self.validate(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_hash_key() {
        let hash = ApiKeyPolicy::hash_key("secret");
        assert_eq!(hash.len(), 64); // SHA-256 hex
        assert_ne!(hash, "secret");
    }

    #[test]
    fn test_accepts_bearer_and_apikey_schemes() {
        let policy = ApiKeyPolicy::from_keys(["secret"]);
        assert!(policy.authorize(&headers("Bearer secret"), Access::Read).is_ok());
        assert!(policy.authorize(&headers("ApiKey secret"), Access::Write).is_ok());
    }

    #[test]
    fn test_rejects_unknown_and_missing() {
        let policy = ApiKeyPolicy::from_keys(["secret"]);
        assert_eq!(
            policy.authorize(&headers("Bearer other"), Access::Read),
            Err(AuthError::InvalidApiKey)
        );
        assert_eq!(
            policy.authorize(&headers("Basic c2VjcmV0"), Access::Read),
            Err(AuthError::MissingAuth)
        );
        assert_eq!(
            policy.authorize(&HeaderMap::new(), Access::Read),
            Err(AuthError::MissingAuth)
        );
    }
}
