//! Azure Active Directory client credentials for the cluster.
//!
//! Tokens come from an `azure_identity` client secret credential, which
//! caches them until shortly before they expire.

use std::{fmt, sync::Arc};

use azure_core::credentials::TokenCredential;
use azure_identity::{ClientSecretCredential, ClientSecretCredentialOptions, TokenCredentialOptions};
use serde::{Deserialize, Serialize};
use url::Url;

use super::config::{BuildError, MissingCredentialSnafu};

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Service principal used to talk to the cluster.
///
/// Every field falls back to the matching `AZURE_*` environment variable.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AzureAuthConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Defaults to the public cloud, `https://login.microsoftonline.com`.
    pub authority_host: Option<String>,
}

impl fmt::Debug for AzureAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureAuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "**REDACTED**"))
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

impl AzureAuthConfig {
    pub fn resolve(&self) -> Result<AzureCredentials, BuildError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<AzureCredentials, BuildError> {
        let pick = |value: &Option<String>, field: &'static str, env_var: &'static str| {
            value
                .clone()
                .or_else(|| env(env_var))
                .filter(|value| !value.is_empty())
                .ok_or_else(|| MissingCredentialSnafu { field, env_var }.build())
        };

        Ok(AzureCredentials {
            tenant_id: pick(&self.tenant_id, "tenant_id", "AZURE_TENANT_ID")?,
            client_id: pick(&self.client_id, "client_id", "AZURE_CLIENT_ID")?,
            client_secret: pick(&self.client_secret, "client_secret", "AZURE_CLIENT_SECRET")?,
            authority_host: self
                .authority_host
                .clone()
                .or_else(|| env("AZURE_AUTHORITY_HOST"))
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_owned()),
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"**REDACTED**")
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

/// Hands out bearer tokens for one cluster.
#[derive(Clone)]
pub(super) struct AzureDataExplorerAuth {
    credential: Arc<dyn TokenCredential>,
    scope: String,
}

impl fmt::Debug for AzureDataExplorerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureDataExplorerAuth")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl AzureDataExplorerAuth {
    pub(super) fn new(credentials: &AzureCredentials, cluster: &Url) -> crate::Result<Self> {
        let mut credential_options = TokenCredentialOptions::default();
        credential_options.set_authority_host(credentials.authority_host.clone());

        let credential: Arc<dyn TokenCredential> = ClientSecretCredential::new(
            &credentials.tenant_id,
            credentials.client_id.clone(),
            credentials.client_secret.clone().into(),
            Some(ClientSecretCredentialOptions { credential_options }),
        )?;

        Ok(Self {
            credential,
            scope: token_scope(cluster),
        })
    }

    pub(super) async fn get_token(&self) -> crate::Result<String> {
        let token = self
            .credential
            .get_token(&[self.scope.as_str()], None)
            .await?;
        Ok(token.token.secret().to_owned())
    }
}

fn token_scope(cluster: &Url) -> String {
    format!("{}/.default", cluster.origin().ascii_serialization())
}
