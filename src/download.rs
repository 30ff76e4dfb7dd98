use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::client::{Client, RemoteFile};
use crate::util::{backoff, guess_filename_from_url};

/// Sibling file that receives bytes until the transfer is complete.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

impl Client {
    /// Downloads `file` to `target`, resuming a previous partial transfer.
    ///
    /// Bytes land in `<target>.part` and are renamed into place once
    /// `content_length` bytes were received. `progress` is advanced by the
    /// number of bytes written.
    pub fn download(
        &self,
        file: &RemoteFile,
        target: &Path,
        progress: Option<&ProgressBar>,
    ) -> Result<PathBuf> {
        let target = if target.as_os_str().is_empty() {
            guess_filename_from_url(&file.location)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("download"))
        } else {
            target.to_path_buf()
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }

        let partial = partial_path(&target);
        let mut downloaded: u64 = 0;
        let mut mode_append = false;
        let mut range_from: Option<u64> = None;

        if partial.exists() {
            downloaded = std::fs::metadata(&partial)?.len();
            if downloaded < file.content_length {
                mode_append = true;
                range_from = Some(downloaded);
                debug!(path = %partial.display(), downloaded, "resuming partial download");
            } else {
                downloaded = 0;
            }
        }
        if let Some(pb) = progress {
            pb.inc(downloaded);
        }

        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1);
        'download_attempt: while tries < self.retry_max {
            let mut headers = HeaderMap::new();
            if let Some(from) = range_from {
                headers.insert(RANGE, HeaderValue::from_str(&format!("bytes={}-", from))?);
            }

            let resp = self.robust_request(|| {
                let req = self.http.get(&file.location).headers(headers.clone());
                self.apply_user(req).send()
            })?;

            // A server ignoring the range answers 200 with the full body.
            if range_from.is_some() && resp.status().as_u16() == 200 {
                mode_append = false;
                if let Some(pb) = progress {
                    pb.set_position(pb.position().saturating_sub(downloaded));
                }
                downloaded = 0;
            }

            let mut resp = resp.error_for_status().context("download request failed")?;
            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .append(mode_append)
                .truncate(!mode_append)
                .open(&partial)
                .with_context(|| format!("failed to open {}", partial.display()))?;

            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match resp.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Err(e).context("download interrupted")?;
                        }

                        // resume
                        out.flush().ok();
                        let on_disk = std::fs::metadata(&partial)?.len();
                        if let Some(pb) = progress {
                            pb.set_position(pb.position().saturating_sub(downloaded.saturating_sub(on_disk)));
                        }
                        downloaded = on_disk;
                        range_from = Some(downloaded);
                        mode_append = true;
                        thread::sleep(sleep);
                        sleep = backoff(sleep, self.sleep_max);
                        continue 'download_attempt;
                    }
                };

                out.write_all(&buf[..n])?;
                downloaded += n as u64;
                if let Some(pb) = progress {
                    pb.inc(n as u64);
                }
            }

            out.flush()?;
            drop(out);

            if downloaded >= file.content_length {
                if target.exists() {
                    std::fs::remove_file(&target)
                        .with_context(|| format!("failed to replace {}", target.display()))?;
                }
                std::fs::rename(&partial, &target)
                    .with_context(|| format!("failed to move download to {}", target.display()))?;
                return Ok(target);
            }

            tries += 1;
            // resume and retry
            downloaded = std::fs::metadata(&partial)?.len();
            range_from = Some(downloaded);
            mode_append = true;
            thread::sleep(sleep);
            sleep = backoff(sleep, self.sleep_max);
        }

        bail!(
            "download failed: downloaded {} byte(s) out of {} for {}",
            downloaded,
            file.content_length,
            file.location
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMode;
    use crate::client::ClientConfig;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    /// Answers one connection per canned response and returns the request heads.
    fn serve(responses: Vec<Vec<u8>>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/native/file.nc", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut heads = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                    head.push_str(&line);
                }
                heads.push(head.to_lowercase());
                stream.write_all(&response).unwrap();
            }
            heads
        });
        (url, handle)
    }

    fn reply(status: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn client() -> Client {
        Client::new(ClientConfig {
            progress: false,
            cache_mode: CacheMode::Disabled,
            ..ClientConfig::default()
        })
        .unwrap()
        .with_retry_max(3)
        .with_sleep_max(Duration::from_millis(10))
    }

    #[test]
    fn partial_sits_next_to_target() {
        assert_eq!(
            partial_path(Path::new("out/2024/file.nc")),
            PathBuf::from("out/2024/file.nc.part")
        );
    }

    #[test]
    fn resumes_existing_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.nc");
        std::fs::write(partial_path(&target), b"hello ").unwrap();
        let (location, server) = serve(vec![reply("206 Partial Content", b"world")]);

        let file = RemoteFile {
            location,
            content_length: 11,
        };
        let written = client().download(&file, &target, None).unwrap();

        let heads = server.join().unwrap();
        assert!(heads[0].contains("range: bytes=6-"), "{}", heads[0]);
        assert_eq!(written, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn full_reply_to_range_request_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.nc");
        std::fs::write(partial_path(&target), b"stale").unwrap();
        let (location, server) = serve(vec![reply("200 OK", b"hello world")]);

        let file = RemoteFile {
            location,
            content_length: 11,
        };
        client().download(&file, &target, None).unwrap();

        let heads = server.join().unwrap();
        assert!(heads[0].contains("range: bytes=5-"), "{}", heads[0]);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn short_body_is_completed_with_a_range_request() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("file.nc");
        let (location, server) = serve(vec![
            reply("200 OK", b"hello "),
            reply("206 Partial Content", b"world"),
        ]);

        let file = RemoteFile {
            location,
            content_length: 11,
        };
        client().download(&file, &target, None).unwrap();

        let heads = server.join().unwrap();
        assert_eq!(heads.len(), 2);
        assert!(!heads[0].contains("range:"), "{}", heads[0]);
        assert!(heads[1].contains("range: bytes=6-"), "{}", heads[1]);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello world");
    }
}
