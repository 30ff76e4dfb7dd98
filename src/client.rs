use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheMode, MetadataCache};
use crate::config::tls_verification_enabled;
use crate::error::{ServerErrorResponse, format_server_error};
use crate::util::{backoff, retriable_status};

pub(crate) const COPERNICUS_CLIENT_HEADER: &str = "x-cop-client";
pub(crate) const COPERNICUS_USER_HEADER: &str = "x-cop-user";
const COPERNICUS_CLIENT_NAME: &str = "COPERNICUS_MARINE_TOOLBOX";

const METADATA_URL: &str = "https://s3.waw3-1.cloudferro.com/mdl-metadata/metadata";
const METADATA_URL_STAGING: &str = "https://s3.waw3-1.cloudferro.com/mdl-metadata-dta/metadata";

pub(crate) const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 15;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Use the staging metadata bucket instead of production.
    pub staging: bool,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Upper bound of parallel HTTP requests (catalogue fetches, file downloads).
    pub max_concurrent_requests: usize,
    /// Show progress bars on stderr.
    pub progress: bool,
    pub cache_mode: CacheMode,
    pub cache_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            staging: false,
            verify: tls_verification_enabled(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            progress: true,
            cache_mode: CacheMode::Enabled,
            cache_dir: MetadataCache::default_dir(),
        }
    }
}

/// Session shared by every operation: HTTP client, retry policy and metadata cache.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) config: ClientConfig,
    username: Option<String>,

    pub(crate) retry_max: usize,
    pub(crate) sleep_max: Duration,

    pub(crate) cache: MetadataCache,
    pub(crate) http: HttpClient,
}

#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Download URL.
    pub location: String,
    /// Expected content length (bytes).
    pub content_length: u64,
}

impl Client {
    /// Creates a client with default settings (`COPERNICUSMARINE_*` environment honoured).
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("copernicusmarine-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("copernicusmarine-rs")),
        );
        default_headers.insert(
            COPERNICUS_CLIENT_HEADER,
            HeaderValue::from_static(COPERNICUS_CLIENT_NAME),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(60));

        if !config.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;
        let cache = MetadataCache::new(config.cache_dir.clone(), config.cache_mode);

        Ok(Self {
            config,
            username: None,
            retry_max: 5,
            sleep_max: Duration::from_secs(30),
            cache,
            http,
        })
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.config.progress = progress;
        self
    }

    /// Tags subsequent data requests with the user name, as the data store expects.
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.config.max_concurrent_requests.max(1)
    }

    pub(crate) fn metadata_base_url(&self) -> &'static str {
        if self.config.staging {
            METADATA_URL_STAGING
        } else {
            METADATA_URL
        }
    }

    pub(crate) fn progress_bar(&self, len: u64, template: &str) -> Option<ProgressBar> {
        if !self.config.progress {
            return None;
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        pb.set_style(style);
        Some(pb)
    }

    pub(crate) fn apply_user(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => req.header(COPERNICUS_USER_HEADER, user.as_str()),
            None => req,
        }
    }

    /// GETs a JSON metadata document, going through the metadata cache.
    pub(crate) fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = match self.cache.get(url) {
            Some(text) => text,
            None => {
                let text = self.get_text(url)?;
                if let Err(e) = self.cache.put(url, &text) {
                    debug!(error = %e, "could not write metadata cache");
                }
                text
            }
        };
        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse JSON document (url={})", url))
    }

    /// Like [`Client::get_json`] but `Ok(None)` on 404/403 (S3 answers 403 for absent keys).
    pub(crate) fn get_json_opt<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        if let Some(text) = self.cache.get(url) {
            return serde_json::from_str::<T>(&text)
                .map(Some)
                .with_context(|| format!("failed to parse JSON document (url={})", url));
        }
        let resp = self.robust_request(|| self.apply_user(self.http.get(url)).send())?;
        let status = resp.status();
        if status.as_u16() == 404 || status.as_u16() == 403 {
            return Ok(None);
        }
        let text = checked_text(resp, url)?;
        if let Err(e) = self.cache.put(url, &text) {
            debug!(error = %e, "could not write metadata cache");
        }
        serde_json::from_str::<T>(&text)
            .map(Some)
            .with_context(|| format!("failed to parse JSON document (url={})", url))
    }

    pub(crate) fn get_text(&self, url: &str) -> Result<String> {
        debug!(url, "GET");
        let resp = self.robust_request(|| self.apply_user(self.http.get(url)).send())?;
        checked_text(resp, url)
    }

    pub(crate) fn robust_request<F>(&self, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1);
        loop {
            let result = f();

            match result {
                Ok(resp) => {
                    if retriable_status(resp.status().as_u16()) {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Ok(resp);
                        }
                        debug!(status = %resp.status(), tries, "retrying request");
                        thread::sleep(sleep);
                        sleep = backoff(sleep, self.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(err).context("could not connect")?;
                    }
                    // timeouts / transient connection errors
                    debug!(error = %err, tries, "retrying request");
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.sleep_max);
                }
            }
        }
    }
}

pub(crate) fn checked_text(resp: Response, url: &str) -> Result<String> {
    let status = resp.status();
    let text = resp.text().unwrap_or_default();
    if !status.is_success() {
        if let Ok(err_json) = serde_json::from_str::<ServerErrorResponse>(&text) {
            return Err(format_server_error(status, url, &err_json));
        }
        bail!("request failed: HTTP {} for url ({})\n{}", status, url, text);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_switches_metadata_bucket() {
        let client = Client::new(ClientConfig {
            staging: true,
            cache_mode: CacheMode::Disabled,
            ..ClientConfig::default()
        })
        .unwrap();
        assert!(client.metadata_base_url().contains("mdl-metadata-dta"));
        let client = Client::new(ClientConfig::default()).unwrap();
        assert!(client.metadata_base_url().ends_with("/mdl-metadata/metadata"));
    }

    #[test]
    fn cached_document_is_served_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(ClientConfig {
            cache_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        })
        .unwrap();
        let url = "https://metadata.invalid/catalog.stac.json";
        client.cache.put(url, r#"{"links": []}"#).unwrap();
        let doc: serde_json::Value = client.get_json(url).unwrap();
        assert_eq!(doc["links"], serde_json::json!([]));
        let doc: Option<serde_json::Value> = client.get_json_opt(url).unwrap();
        assert!(doc.is_some());
    }

    #[test]
    fn progress_disabled() {
        let client = Client::from_env().unwrap().with_progress(false);
        assert!(client.progress_bar(10, "{bar}").is_none());
        assert_eq!(client.with_retry_max(0).retry_max, 1);
    }
}
