//! Credential verification for the WebSocket authentication handshake

use crate::types::Identity;
use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a presented credential could not be resolved to an identity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credential required")]
    MissingCredential,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Credential expired")]
    ExpiredCredential,
    #[error("Account not found")]
    PrincipalNotFound,
}

/// Resolves a credential string to an identity. The hub treats this as an
/// opaque async capability; verification may hit a key store or a directory.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Claims carried by the platform's access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub exp: usize,
}

/// HS256 token verifier matching the platform's auth service
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let data =
            decode::<Claims>(credential, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
                    _ => AuthError::InvalidCredential,
                }
            })?;
        Ok(data.claims.id)
    }
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AuthConfig {
    /// Load auth config from environment variables
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match secret {
            Some(jwt_secret) => {
                tracing::info!("Token verification enabled");
                Self { jwt_secret }
            }
            None => {
                tracing::warn!(
                    "JWT_SECRET not set - using an insecure development secret, do not run this in production!"
                );
                Self {
                    jwt_secret: "feedhub-dev-secret".to_string(),
                }
            }
        }
    }
}
