// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Google authorization-code exchange for social login.

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{ApiError, ErrorCode};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Token response from Google's OAuth endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokens {
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GoogleOAuth {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleOAuth {
    pub fn new(
        client: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: GOOGLE_TOKEN_URL.to_owned(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Build from config; `None` unless client id, secret and redirect URI
    /// are all set.
    pub fn from_config(config: &SyncConfig, client: reqwest::Client) -> Option<Self> {
        Some(Self::new(
            client,
            config.google_client_id.clone()?,
            config.google_client_secret.clone()?,
            config.google_redirect_uri.clone()?,
        ))
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Exchange an authorization code for Google tokens. The `id_token` is
    /// what the backend's social login expects.
    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<GoogleTokens> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ApiError::new(ErrorCode::Network, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OAuthErrorBody>(&text) {
                Ok(body) => match body.error_description {
                    Some(desc) => format!("{}: {desc}", body.error),
                    None => body.error,
                },
                Err(_) => format!("code exchange failed ({status}): {text}"),
            };
            return Err(ApiError::from_status(status.as_u16(), message).into());
        }

        let tokens: GoogleTokens = resp.json().await.map_err(|e| {
            ApiError::new(ErrorCode::Protocol, format!("invalid token response: {e}"))
        })?;
        Ok(tokens)
    }
}
