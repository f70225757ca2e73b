// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared HTTP client for the marketplace REST backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ErrorCode, ErrorResponse};
use crate::session::SessionStore;

/// REST client that attaches the current bearer token and maps non-2xx
/// responses to [`ApiError`].
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    sessions: Arc<SessionStore>,
    client: Client,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        sessions: Arc<SessionStore>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        crate::install_crypto_provider();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_owned(), sessions, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying reqwest client, for calls outside the backend.
    pub fn http(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match self.sessions.tokens() {
            Some(tokens) => req.bearer_auth(tokens.access_token),
            None => req,
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let mut req = self.client.request(method, self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = self.apply_auth(req).send().await.map_err(network_error)?;
        read_body(resp).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let value = self.execute(Method::GET, path, None).await?;
        decode(path, value)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> anyhow::Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let value = self.execute(Method::POST, path, Some(&body)).await?;
        decode(path, value)
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> anyhow::Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let value = self.execute(Method::PUT, path, Some(&body)).await?;
        decode(path, value)
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        self.execute(Method::DELETE, path, None).await
    }
}

fn network_error(err: reqwest::Error) -> anyhow::Error {
    ApiError::new(ErrorCode::Network, err.to_string()).into()
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> anyhow::Result<T> {
    serde_json::from_value(value).map_err(|e| {
        ApiError::new(ErrorCode::Protocol, format!("unexpected response from {path}: {e}")).into()
    })
}

/// Read a response body, turning non-2xx statuses into [`ApiError`].
///
/// Empty 2xx bodies read as `Value::Null`.
pub(crate) async fn read_body(resp: Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(network_error)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|r| r.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(&bytes).trim().to_owned();
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_owned()
                } else {
                    text
                }
            });
        return Err(ApiError::from_status(status.as_u16(), message).into());
    }

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::new(ErrorCode::Protocol, format!("invalid JSON body: {e}")).into())
}
