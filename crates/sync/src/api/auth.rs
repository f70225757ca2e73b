// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/auth/*` endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::session::{TokenPair, UserIdentity};

/// Tokens plus identity returned by a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<UserIdentity>,
}

impl AuthResult {
    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Exchange a refresh token for a new token pair.
pub async fn refresh_token(api: &ApiClient, refresh_token: &str) -> anyhow::Result<TokenPair> {
    api.post_json("/auth/refresh-token", &json!({ "refreshToken": refresh_token })).await
}

/// Identity of the bearer of the current access token.
pub async fn current_user(api: &ApiClient) -> anyhow::Result<UserIdentity> {
    api.get_json("/auth/me").await
}

/// Sign in with a Google identity token.
pub async fn login_google(api: &ApiClient, id_token: &str) -> anyhow::Result<AuthResult> {
    api.post_json("/auth/login-google", &json!({ "token": id_token })).await
}

/// Revoke `refresh_token` on the backend.
pub async fn logout(api: &ApiClient, refresh_token: &str) -> anyhow::Result<()> {
    let _: Value = api.post_json("/auth/logout", &json!({ "refreshToken": refresh_token })).await?;
    Ok(())
}
