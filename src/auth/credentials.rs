/*!
 * Credential types and the provider interface
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A set of access credentials, possibly temporary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,

    /// Present for temporary (STS) credentials
    #[serde(default)]
    pub security_token: Option<String>,

    /// Expiry for temporary credentials
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
            expires_at: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now(),
            None => false,
        }
    }
}

/// Source of credentials, called once per signed request.
///
/// The SDK does not care how credentials are fetched; rotating sources
/// (STS refresh loops, instance metadata) implement this trait outside
/// the crate and hand out the current set on demand.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

/// Fixed credentials known at construction time
#[derive(Debug, Clone)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(access_key_id, access_key_secret),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.security_token = Some(token.into());
        self
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}
