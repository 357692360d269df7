//! HTTP client for the chat backend REST API
//!
//! Thin wrapper around reqwest::Client that joins paths onto the configured
//! base URL and turns non-2xx responses into errors.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config::Config;

pub struct ChatClient {
    http: reqwest::Client,
    base: String,
}

impl ChatClient {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_url)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// GET that maps 404 to `None` instead of an error.
    pub async fn get_optional(&self, path: &str) -> Result<Option<reqwest::Response>> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_response(resp, &url).await.map(Some)
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("PUT {}", url);

        let resp = self
            .http
            .put(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?;

        check_response(resp, &url).await
    }

    pub async fn delete<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url))?;

        check_response(resp, &url).await
    }

    pub async fn multipart(&self, path: &str, form: reqwest::multipart::Form) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST (multipart) {}", url);

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, error_message(&body));
    }
    Ok(resp)
}

/// The backend reports failures as `{"error": "..."}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|e| e.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = ChatClient::new("http://localhost:4000/");
        assert_eq!(client.url("/health"), "http://localhost:4000/health");
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error":"User not found"}"#), "User not found");
        assert_eq!(error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    }
}
