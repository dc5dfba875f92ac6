//! Keeps a Google OAuth access token fresh.
//!
//! Obtaining the first refresh token (the browser consent flow) is done outside of this program.
//! Given a `client_secret.json` and a `token.json` that holds a refresh token, the `TokenProvider`
//! exchanges the refresh token for a new access token whenever the current one is about to expire
//! and writes the result back to `token.json`.

use crate::api::files::{File, SecretFile, TokenFile};
use crate::api::OAUTH_SCOPES;
use crate::error::Res;
use anyhow::{bail, Context};
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use std::path::Path;
use tracing::{debug, info};

/// Refresh when the access token has less than this long to live.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Google does not always say how long a token lives. This is what it usually is.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

pub(crate) struct TokenProvider {
    secret: SecretFile,
    token: File<TokenFile>,
    http: reqwest::Client,
}

impl TokenProvider {
    /// Loads the client secret and the token files.
    ///
    /// # Errors
    /// - Either file is missing or cannot be parsed.
    /// - The token file lists scopes but not the ones we need.
    pub(crate) async fn load(
        client_secret_path: impl AsRef<Path>,
        token_path: impl AsRef<Path>,
    ) -> Res<Self> {
        let secret = File::<SecretFile>::load(client_secret_path.as_ref())
            .await
            .context("Unable to load the OAuth client secret file")?
            .data()
            .clone();
        let token = File::<TokenFile>::load(token_path.as_ref())
            .await
            .context("Unable to load the OAuth token file")?;
        validate_scopes(token.data())?;

        // Following redirects is disabled to avoid SSRF through the token endpoint.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Unable to build the HTTP client for OAuth")?;

        Ok(Self {
            secret,
            token,
            http,
        })
    }

    /// The current access token, which may be expired.
    pub(crate) fn token(&self) -> &str {
        self.token.data().access_token()
    }

    /// Returns an access token that is good for at least another minute, refreshing it first if
    /// necessary.
    pub(crate) async fn token_with_refresh(&mut self) -> Res<&str> {
        if self
            .token
            .data()
            .expires_within(chrono::Duration::seconds(EXPIRY_BUFFER_SECS))
        {
            self.refresh().await?;
        }
        Ok(self.token())
    }

    /// Exchanges the refresh token for a new access token and saves it.
    pub(crate) async fn refresh(&mut self) -> Res<()> {
        debug!(
            "Refreshing the OAuth access token, which expires at {}",
            self.token.data().expires_at()
        );
        let client = BasicClient::new(ClientId::new(self.secret.client_id().to_string()))
            .set_client_secret(ClientSecret::new(self.secret.client_secret().to_string()))
            .set_auth_uri(
                AuthUrl::new(self.secret.auth_uri().to_string())
                    .context("Invalid auth_uri in the client secret file")?,
            )
            .set_token_uri(
                TokenUrl::new(self.secret.token_uri().to_string())
                    .context("Invalid token_uri in the client secret file")?,
            );

        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .context("Unable to refresh the OAuth access token")?;

        let lifetime = response
            .expires_in()
            .and_then(|d| i64::try_from(d.as_secs()).ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(lifetime);
        self.token.data_mut().update(
            response.access_token().secret().clone(),
            expires_at,
            response.refresh_token().map(|rt| rt.secret().clone()),
        );
        self.token.save().await?;
        info!(
            "Saved a refreshed OAuth token to {}",
            self.token.path().display()
        );
        Ok(())
    }
}

/// An empty scope list is accepted because not every tool that writes `token.json` records them.
fn validate_scopes(token: &TokenFile) -> Res<()> {
    if token.scopes().is_empty() {
        return Ok(());
    }
    for &required in OAUTH_SCOPES {
        if !token.scopes().iter().any(|s| s == required) {
            bail!("OAuth scope '{required}' is missing from the token file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;
    use tempfile::TempDir;

    const SECRET: &str = r#"{
        "installed": {
            "client_id": "test-client-id",
            "client_secret": "test-secret",
            "redirect_uris": ["http://localhost"],
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token"
        }
    }"#;

    async fn write_files(dir: &TempDir, token: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let secret_path = dir.path().join("client_secret.json");
        let token_path = dir.path().join("token.json");
        utils::write(&secret_path, SECRET).await.unwrap();
        utils::write(&token_path, token).await.unwrap();
        (secret_path, token_path)
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_without_refresh() {
        let dir = TempDir::new().unwrap();
        let expires = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let token = format!(
            r#"{{"access_token": "live", "refresh_token": "r", "expires_at": "{expires}"}}"#
        );
        let (secret, token_path) = write_files(&dir, &token).await;
        let mut provider = TokenProvider::load(secret, token_path).await.unwrap();
        // no network access happens because the token is not close to expiring
        assert_eq!(provider.token_with_refresh().await.unwrap(), "live");
    }

    #[tokio::test]
    async fn test_missing_scope_is_rejected() {
        let dir = TempDir::new().unwrap();
        let token = r#"{
            "scopes": ["https://www.googleapis.com/auth/drive.readonly"],
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": "2025-01-01T00:00:00Z"
        }"#;
        let (secret, token_path) = write_files(&dir, token).await;
        let err = TokenProvider::load(secret, token_path)
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("spreadsheets"));
    }

    #[tokio::test]
    async fn test_missing_files() {
        let dir = TempDir::new().unwrap();
        let result = TokenProvider::load(dir.path().join("a"), dir.path().join("b")).await;
        assert!(result.is_err());
    }
}
