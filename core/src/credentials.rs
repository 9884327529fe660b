//! Bearer-token retrieval for the speech API.
//!
//! Any failure here is fatal: the pipeline refuses to start without a token.

use crate::{Result, VoxError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Human-readable origin of the token, for logs
    fn describe(&self) -> String;

    async fn token(&self) -> Result<String>;
}

/// macOS keychain lookup through the `security` tool
#[derive(Debug, Clone)]
pub struct KeychainCredentials {
    pub security_bin: PathBuf,
    pub service: String,
    pub account: String,
}

impl KeychainCredentials {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            security_bin: PathBuf::from("security"),
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for KeychainCredentials {
    fn describe(&self) -> String {
        format!("keychain service={} account={}", self.service, self.account)
    }

    async fn token(&self) -> Result<String> {
        debug!(target = "credentials", service = %self.service, "Retrieving API key from keychain");
        let output = Command::new(&self.security_bin)
            .arg("find-generic-password")
            .arg("-a")
            .arg(&self.account)
            .arg("-s")
            .arg(&self.service)
            .arg("-w")
            .output()
            .await
            .map_err(|e| {
                VoxError::Credentials(format!(
                    "failed to run {}: {e}",
                    self.security_bin.display()
                ))
            })?;
        if !output.status.success() {
            return Err(VoxError::Credentials(format!(
                "keychain lookup for '{}' failed: {}",
                self.service,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        non_empty(token, || self.describe())
    }
}

/// Token read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    pub var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new("OPENAI_API_KEY")
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    fn describe(&self) -> String {
        format!("env {}", self.var)
    }

    async fn token(&self) -> Result<String> {
        let token = std::env::var(&self.var)
            .map_err(|_| VoxError::Credentials(format!("{} is not set", self.var)))?;
        non_empty(token.trim().to_string(), || self.describe())
    }
}

/// Fixed token
#[derive(Clone)]
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredentials(***)")
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn token(&self) -> Result<String> {
        non_empty(self.0.clone(), || self.describe())
    }
}

fn non_empty(token: String, origin: impl FnOnce() -> String) -> Result<String> {
    if token.is_empty() {
        return Err(VoxError::Credentials(format!("empty token from {}", origin())));
    }
    Ok(token)
}
