//! Anonymous S3 listing of the buckets that hold original files.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::Client;

/// `https://<endpoint>/<bucket>/<prefix>` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct S3Location {
    pub(crate) endpoint: String,
    pub(crate) bucket: String,
    pub(crate) prefix: String,
}

impl S3Location {
    pub(crate) fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("invalid service URI {uri}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("service URI without host: {uri}"))?;
        let endpoint = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };
        let path = url.path().trim_start_matches('/');
        let (bucket, prefix) = match path.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (path, ""),
        };
        if bucket.is_empty() {
            return Err(anyhow!("service URI without bucket: {uri}"));
        }
        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub(crate) fn https_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    pub(crate) fn s3_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    pub(crate) fn list_url(&self, prefix: &str, continuation_token: Option<&str>) -> Result<String> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, self.bucket))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("prefix", prefix);
            if let Some(token) = continuation_token {
                query.append_pair("continuation-token", token);
            }
        }
        Ok(url.into())
    }

    /// The key prefix listed for this dataset, always ending with `/`.
    pub(crate) fn dataset_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListBucketResult {
    #[serde(default)]
    pub(crate) is_truncated: bool,
    #[serde(default)]
    pub(crate) next_continuation_token: Option<String>,
    #[serde(default)]
    pub(crate) contents: Vec<S3Object>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct S3Object {
    pub(crate) key: String,
    pub(crate) last_modified: DateTime<Utc>,
    #[serde(rename = "ETag", default)]
    pub(crate) etag: String,
    pub(crate) size: u64,
}

pub(crate) fn parse_list_objects(xml: &str) -> Result<ListBucketResult> {
    quick_xml::de::from_str(xml).context("failed to parse S3 ListObjectsV2 response")
}

impl Client {
    /// Every object under `prefix`, following continuation tokens.
    pub(crate) fn list_objects(&self, location: &S3Location, prefix: &str) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let url = location.list_url(prefix, token.as_deref())?;
            let page = parse_list_objects(&self.get_text(&url)?)?;
            debug!(bucket = %location.bucket, prefix, keys = page.contents.len(), "listed page");
            objects.extend(page.contents);
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }
}
