use std::{fs, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Environment variable holding the access key id.
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";

const PROFILE_ENV: &str = "AWS_PROFILE";
const DEFAULT_PROFILE: &str = "default";

/// Resolved account credentials. Only the access key id is needed here: it seeds the
/// default bucket name. Secrets stay with the object-store client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("credentials not found: {0}")]
    Missing(String),
    #[error("credentials file error: {0}")]
    File(String),
}

/// Provides account credentials (environment or shared file in production; static in tests).
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn resolve(&self) -> Result<Credentials, CredentialsError>;
}

/// Reads the access key id from an environment variable.
pub struct EnvCredentialsProvider {
    var: String,
}

impl EnvCredentialsProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentialsProvider {
    fn default() -> Self {
        Self::new(ACCESS_KEY_ENV)
    }
}

#[async_trait]
impl CredentialsProvider for EnvCredentialsProvider {
    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(Credentials::new(value.trim())),
            _ => Err(CredentialsError::Missing(format!("{} is not set", self.var))),
        }
    }
}

/// Reads `aws_access_key_id` from an INI-style shared credentials file
/// (`~/.aws/credentials` unless told otherwise).
pub struct SharedFileCredentialsProvider {
    path: Option<PathBuf>,
    profile: String,
}

impl SharedFileCredentialsProvider {
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            profile: profile.into(),
        }
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join("credentials")))
    }
}

impl Default for SharedFileCredentialsProvider {
    fn default() -> Self {
        Self {
            path: None,
            profile: std::env::var(PROFILE_ENV).unwrap_or_else(|_| DEFAULT_PROFILE.to_string()),
        }
    }
}

#[async_trait]
impl CredentialsProvider for SharedFileCredentialsProvider {
    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let path = self
            .resolve_path()
            .ok_or_else(|| CredentialsError::Missing("no home directory".to_string()))?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialsError::Missing(format!(
                    "{} does not exist",
                    path.display()
                )))
            }
            Err(err) => return Err(CredentialsError::File(err.to_string())),
        };
        access_key_for_profile(&contents, &self.profile)
            .map(Credentials::new)
            .ok_or_else(|| {
                CredentialsError::Missing(format!(
                    "profile {} has no aws_access_key_id in {}",
                    self.profile,
                    path.display()
                ))
            })
    }
}

/// Fixed credentials for tests and explicit configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentialsProvider {
    inner: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(access_key_id: impl Into<String>) -> Self {
        Self {
            inner: Credentials::new(access_key_id),
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.inner.clone())
    }
}

/// Tries each provider in turn and returns the first success.
pub struct ChainCredentialsProvider {
    providers: Vec<Box<dyn CredentialsProvider>>,
}

impl ChainCredentialsProvider {
    pub fn new(providers: Vec<Box<dyn CredentialsProvider>>) -> Self {
        Self { providers }
    }

    /// Environment first, then the shared credentials file.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Box::new(EnvCredentialsProvider::default()),
            Box::new(SharedFileCredentialsProvider::default()),
        ])
    }
}

#[async_trait]
impl CredentialsProvider for ChainCredentialsProvider {
    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match provider.resolve().await {
                Ok(credentials) => return Ok(credentials),
                Err(err) => reasons.push(err.to_string()),
            }
        }
        Err(CredentialsError::Missing(reasons.join("; ")))
    }
}

fn access_key_for_profile(contents: &str, profile: &str) -> Option<String> {
    let mut in_profile = false;
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_profile = section.trim() == profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "aws_access_key_id" && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
