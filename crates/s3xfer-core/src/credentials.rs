//! Credentials supplier seam and request signing hook.
//!
//! The engine asks its [`CredentialsProvider`] once per exchange that needs
//! signing and hands the result to a [`RequestSigner`]. The bundled signer
//! stamps payload hash and session token headers; it computes no signature.

use async_trait::async_trait;
use std::fmt;

use crate::checksum::sha256_hex;
use crate::error::TransferError;
use crate::http::HttpRequest;

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

/// Signing credentials. The empty key pair means anonymous access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.access_key_id.is_empty() && self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Asynchronous credentials source, owned by the client.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<Credentials, TransferError>;

    /// Release held resources. Called once when the client shuts down.
    fn close(&self) {}
}

/// Fixed credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn get_credentials(&self) -> Result<Credentials, TransferError> {
        Ok(self.credentials.clone())
    }
}

/// Credentials from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
/// `AWS_SESSION_TOKEN`, read on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentCredentialsProvider;

#[async_trait]
impl CredentialsProvider for EnvironmentCredentialsProvider {
    async fn get_credentials(&self) -> Result<Credentials, TransferError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        match (var(ENV_ACCESS_KEY_ID), var(ENV_SECRET_ACCESS_KEY)) {
            (Some(id), Some(secret)) => Ok(Credentials::new(id, secret, var(ENV_SESSION_TOKEN))),
            _ => Err(TransferError::Credentials(format!(
                "{} / {} not set",
                ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCredentialsProvider;

#[async_trait]
impl CredentialsProvider for AnonymousCredentialsProvider {
    async fn get_credentials(&self) -> Result<Credentials, TransferError> {
        Ok(Credentials::anonymous())
    }
}

/// Tries each provider in order; the first success wins.
pub struct DefaultChainProvider {
    chain: Vec<Box<dyn CredentialsProvider>>,
}

impl DefaultChainProvider {
    /// Environment, then anonymous.
    pub fn new() -> Self {
        Self::from_providers(vec![
            Box::new(EnvironmentCredentialsProvider),
            Box::new(AnonymousCredentialsProvider),
        ])
    }

    pub fn from_providers(chain: Vec<Box<dyn CredentialsProvider>>) -> Self {
        Self { chain }
    }
}

impl Default for DefaultChainProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialsProvider for DefaultChainProvider {
    async fn get_credentials(&self) -> Result<Credentials, TransferError> {
        let mut last = None;
        for provider in &self.chain {
            match provider.get_credentials().await {
                Ok(c) => return Ok(c),
                Err(e) => {
                    tracing::debug!(error = %e, "credentials provider in chain failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| TransferError::Credentials("empty provider chain".into())))
    }

    fn close(&self) {
        for provider in &self.chain {
            provider.close();
        }
    }
}

/// Applies credentials to an outgoing request.
pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        request: &mut HttpRequest,
        credentials: &Credentials,
        region: &str,
    ) -> Result<(), TransferError>;
}

/// Stamps `x-amz-content-sha256` and, for temporary credentials,
/// `x-amz-security-token`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadHashSigner;

impl RequestSigner for PayloadHashSigner {
    fn sign(
        &self,
        request: &mut HttpRequest,
        credentials: &Credentials,
        _region: &str,
    ) -> Result<(), TransferError> {
        let hash = sha256_hex(request.body.as_deref().unwrap_or_default());
        request.headers.insert("x-amz-content-sha256", hash);
        if let Some(token) = &credentials.session_token {
            request.headers.insert("x-amz-security-token", token.clone());
        }
        Ok(())
    }
}
