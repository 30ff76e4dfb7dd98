use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read fresh entries, write misses.
    #[default]
    Enabled,
    /// Never read, always refetch and rewrite.
    Overwrite,
    Disabled,
}

/// On-disk cache of metadata documents, keyed by URL.
#[derive(Debug, Clone)]
pub(crate) struct MetadataCache {
    dir: PathBuf,
    mode: CacheMode,
    ttl: Duration,
}

impl MetadataCache {
    pub(crate) fn new(dir: PathBuf, mode: CacheMode) -> Self {
        Self {
            dir,
            mode,
            ttl: CACHE_TTL,
        }
    }

    pub(crate) fn default_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("COPERNICUSMARINE_CACHE_DIRECTORY") {
            return PathBuf::from(dir);
        }
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".copernicusmarine")
            .join("cache")
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let key: String = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(key)
    }

    pub(crate) fn get(&self, url: &str) -> Option<String> {
        if self.mode != CacheMode::Enabled {
            return None;
        }
        let path = self.entry_path(url);
        if !is_fresh(&path, self.ttl) {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(url, "metadata cache hit");
                Some(text)
            }
            Err(_) => None,
        }
    }

    pub(crate) fn put(&self, url: &str, body: &str) -> Result<()> {
        if self.mode == CacheMode::Disabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        let path = self.entry_path(url);
        // write-then-rename so concurrent readers never see a partial document
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write cache entry {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to write cache entry {}", path.display()))?;
        Ok(())
    }
}

fn is_fresh(path: &Path, ttl: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < ttl)
}
