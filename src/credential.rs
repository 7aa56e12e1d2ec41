//! Credential value and provider capability
//!
//! The export driver receives one immutable [`Credential`] at construction.
//! Where it comes from (environment, `.env`, an OAuth bootstrap) is the
//! concern of a [`CredentialProvider`].

use std::fmt;

/// Environment variable holding the consumer key
pub const CONSUMER_KEY_VAR: &str = "POCKET_CONSUMER_KEY";

/// Environment variable holding the access token
pub const ACCESS_TOKEN_VAR: &str = "POCKET_ACCESS_TOKEN";

/// Validated consumer key / access token pair.
///
/// Both components are trimmed and non-empty. `Debug` never prints secrets.
///
/// # Examples
///
/// ```
/// use pocket_exporter::credential::Credential;
///
/// let cred = Credential::new(" 1234-abcd ", "token").unwrap();
/// assert_eq!(cred.consumer_key(), "1234-abcd");
/// assert!(!format!("{cred:?}").contains("token"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    consumer_key: String,
    access_token: String,
}

impl Credential {
    /// Build a credential, rejecting blank components.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Invalid`] if either component is empty after trimming.
    pub fn new(
        consumer_key: impl AsRef<str>,
        access_token: impl AsRef<str>,
    ) -> Result<Self, CredentialError> {
        let consumer_key = consumer_key.as_ref().trim();
        if consumer_key.is_empty() {
            return Err(CredentialError::Invalid(
                "consumer key cannot be empty".to_string(),
            ));
        }

        let access_token = access_token.as_ref().trim();
        if access_token.is_empty() {
            return Err(CredentialError::Invalid(
                "access token cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            consumer_key: consumer_key.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// Consumer key
    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    /// Access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("consumer_key", &redact(&self.consumer_key))
            .field("access_token", &"<redacted>")
            .finish()
    }
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

/// Source of a validated credential, consulted once at export start.
pub trait CredentialProvider {
    /// Produce the credential or report what is missing.
    fn get_credential(&self) -> Result<Credential, CredentialError>;
}

/// Reads the credential from `POCKET_CONSUMER_KEY` / `POCKET_ACCESS_TOKEN`,
/// loading a `.env` file from the working directory first when present.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    load_dotenv: bool,
}

impl EnvCredentials {
    /// Environment provider that also honours `.env`
    pub fn new() -> Self {
        Self { load_dotenv: true }
    }

    /// Environment provider that ignores `.env`
    pub fn without_dotenv() -> Self {
        Self { load_dotenv: false }
    }
}

impl CredentialProvider for EnvCredentials {
    fn get_credential(&self) -> Result<Credential, CredentialError> {
        if self.load_dotenv {
            // A missing .env is the normal case
            let _ = dotenvy::dotenv();
        }

        let consumer_key = std::env::var(CONSUMER_KEY_VAR)
            .map_err(|_| CredentialError::Missing(CONSUMER_KEY_VAR.to_string()))?;
        let access_token = std::env::var(ACCESS_TOKEN_VAR)
            .map_err(|_| CredentialError::Missing(ACCESS_TOKEN_VAR.to_string()))?;

        Credential::new(consumer_key, access_token)
    }
}

/// Fixed credential, handy for tests and embedding
impl CredentialProvider for Credential {
    fn get_credential(&self) -> Result<Credential, CredentialError> {
        Ok(self.clone())
    }
}

/// Credential errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// A required component is not configured
    #[error("missing credential: {0} is not set")]
    Missing(String),

    /// A component is present but unusable
    #[error("invalid credential: {0}")]
    Invalid(String),
}
