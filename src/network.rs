//! Shared network access for providers.
//!
//! A [`Network`] owns one cookie jar and two HTTP clients built from the same
//! configuration. The JSON client asks for `application/json`; the text client
//! sends a browser-like `Accept` header for pages that are scraped as HTML.
//! Some upstream sites serve different content depending on that header, so
//! the two modes are kept on separate clients.

use crate::config::NetworkConfig;
use crate::cookies;
use crate::error::NetworkError;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Guard some JSON endpoints prepend to defeat cross-site script inclusion.
const XSSI_PREFIX: &str = ")]}'";

struct Inner {
    config: NetworkConfig,
    jar: Arc<Jar>,
    json: reqwest::Client,
    text: reqwest::Client,
}

/// HTTP context handed to every provider.
///
/// Cloning is cheap and clones share the cookie jar.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    /// Builds the context described by `config`, with an empty cookie jar.
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        Self::with_jar(config, Arc::new(Jar::default()))
    }

    fn with_jar(config: &NetworkConfig, jar: Arc<Jar>) -> Result<Self, NetworkError> {
        let mut json_headers = HeaderMap::new();
        json_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        json_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,en-US;q=0.9"));

        let mut text_headers = HeaderMap::new();
        text_headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        text_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,en-US;q=0.9"));

        let json = build_client(config, &jar, json_headers)?;
        let text = build_client(config, &jar, text_headers)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                jar,
                json,
                text,
            }),
        })
    }

    /// Builds a sibling context with the same settings and a fresh cookie jar.
    pub fn isolated(&self) -> Result<Self, NetworkError> {
        Self::new(&self.inner.config)
    }

    /// The cookie jar shared by every clone of this context.
    pub fn jar(&self) -> &Jar {
        &self.inner.jar
    }

    /// Loads Netscape cookie files for the given providers from `network.cookie_dir`.
    pub fn seed_cookies(&self, provider_ids: &[&str]) {
        let Some(dir) = &self.inner.config.cookie_dir else {
            return;
        };
        if let Err(err) = cookies::seed_jar(&self.inner.jar, dir, provider_ids) {
            tracing::warn!(dir = %dir.display(), "Failed to load cookies: {}", err);
        }
    }

    /// Fetches `url` and decodes the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, NetworkError> {
        let body = self.fetch(&self.inner.json, url, query).await?;
        decode_lenient(url, &body)
    }

    /// Fetches `url` and returns the body as text, for HTML scraping.
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<String, NetworkError> {
        self.fetch(&self.inner.text, url, query).await
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        url: &str,
        query: &[(String, String)],
    ) -> Result<String, NetworkError> {
        tracing::debug!(url, ?query, "GET");

        let response = client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

fn build_client(
    config: &NetworkConfig,
    jar: &Arc<Jar>,
    headers: HeaderMap,
) -> Result<reqwest::Client, NetworkError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .cookie_provider(Arc::clone(jar))
        .timeout(Duration::from_secs(config.timeout_sec));

    if let Some(proxy) = config.effective_proxy() {
        let proxy = reqwest::Proxy::all(&proxy).map_err(|_| NetworkError::InvalidProxy(proxy))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Decodes a JSON body, tolerating a BOM, an XSSI guard and stray whitespace.
///
/// Fields the target type does not name are ignored.
pub fn decode_lenient<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, NetworkError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    let trimmed = trimmed.strip_prefix(XSSI_PREFIX).unwrap_or(trimmed).trim_start();

    serde_json::from_str(trimmed).map_err(|e| NetworkError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
