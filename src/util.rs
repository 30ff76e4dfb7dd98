use std::path::{Path, PathBuf};
use std::time::Duration;

/// Statuses worth retrying on the metadata, S3 and identity endpoints.
pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Next wait between retries of a metadata request or file download, capped at `max`.
pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(1.0));
    if next > max { max } else { next }
}

/// Last path segment of an S3 object URL, used when a download has no target.
pub(crate) fn guess_filename_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().and_then(|s| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if let Some(stripped) = path.strip_prefix("./") {
        return format!("{}/{}", base, stripped);
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Parent "directory" of a URL, used to resolve relative STAC links.
pub(crate) fn url_parent(url: &str) -> &str {
    match url.rfind('/') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

pub(crate) fn bytes_to_megabytes(bytes: u64) -> f64 {
    let mb = bytes as f64 / 1_048_576.0;
    (mb * 1000.0).round() / 1000.0
}

/// Returns `path` if free, else the first free `<stem>_(n).<ext>` sibling.
///
/// Zarr outputs are directories, so `exists()` covers both cases.
pub(crate) fn next_available_path(path: &Path) -> PathBuf {
    next_free_path(path, |p| p.exists())
}

/// [`next_available_path`] with a caller-defined notion of "taken".
pub(crate) fn next_free_path(path: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(path) {
        return path.to_path_buf();
    }
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1usize;
    loop {
        let candidate = parent.join(format!("{}_({}){}", stem, n, ext));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urljoin_handles_relative_and_absolute() {
        assert_eq!(
            urljoin("https://host/metadata", "./PRODUCT/product.stac.json"),
            "https://host/metadata/PRODUCT/product.stac.json"
        );
        assert_eq!(urljoin("https://host/a/", "b"), "https://host/a/b");
        assert_eq!(urljoin("https://host/a", "https://other/x"), "https://other/x");
    }

    #[test]
    fn parent_of_url() {
        assert_eq!(
            url_parent("https://host/metadata/catalog.stac.json"),
            "https://host/metadata"
        );
    }

    #[test]
    fn backoff_is_capped() {
        let max = Duration::from_secs(10);
        assert_eq!(backoff(Duration::from_secs(0), max), Duration::from_secs(1));
        assert_eq!(backoff(Duration::from_secs(8), max), max);
    }

    #[test]
    fn filename_from_url_ignores_query() {
        assert_eq!(
            guess_filename_from_url("https://h/b/native/file.nc?x=1").as_deref(),
            Some("file.nc")
        );
        assert_eq!(guess_filename_from_url("https://h/b/"), None);
    }

    #[test]
    fn next_available_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.nc");
        assert_eq!(next_available_path(&target), target);
        std::fs::write(&target, b"x").unwrap();
        std::fs::write(dir.path().join("data_(1).nc"), b"x").unwrap();
        assert_eq!(next_available_path(&target), dir.path().join("data_(2).nc"));
    }
}
