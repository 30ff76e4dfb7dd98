//! Original-files download: list, filter, plan output paths, transfer.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use glob::Pattern;
use regex::Regex;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::client::{Client, RemoteFile};
use crate::concurrency::try_run_concurrently;
use crate::models::Service;
use crate::request::GetRequest;
use crate::response::{FileGet, FileStatus, ResponseGet, StatusCode};
use crate::s3::{S3Location, S3Object};
use crate::util::{bytes_to_megabytes, next_free_path};

const NATIVE_PREFIX: &str = "native/";

/// Objects left after the request filters, plus file-list entries that matched nothing.
pub(crate) fn select_objects(
    objects: Vec<S3Object>,
    location: &S3Location,
    request: &GetRequest,
    file_list: Option<&[String]>,
) -> Result<(Vec<S3Object>, Vec<String>)> {
    let prefix = location.dataset_prefix();
    let pattern = request
        .filter
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .context("invalid --filter pattern")?;
    let regex = request
        .regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --regex expression")?;

    let mut selected: Vec<S3Object> = objects
        .into_iter()
        .filter(|o| !o.key.ends_with('/'))
        .filter(|o| {
            let relative = o.key.strip_prefix(&prefix).unwrap_or(&o.key);
            if request.index_parts {
                return is_index_file(relative);
            }
            pattern.as_ref().is_none_or(|p| p.matches(relative))
                && regex.as_ref().is_none_or(|r| r.is_match(relative))
        })
        .collect();

    let mut not_found = Vec::new();
    if let Some(entries) = file_list {
        let keys: Vec<String> = entries.iter().map(|e| file_list_key(e, location)).collect();
        for (entry, key) in entries.iter().zip(&keys) {
            if !selected.iter().any(|o| key_matches(&o.key, key)) {
                not_found.push(entry.clone());
            }
        }
        selected.retain(|o| keys.iter().any(|k| key_matches(&o.key, k)));
    }
    Ok((selected, not_found))
}

fn is_index_file(relative: &str) -> bool {
    !relative.contains('/') && relative.starts_with("index_") && relative.ends_with(".txt")
}

fn key_matches(object_key: &str, wanted: &str) -> bool {
    object_key == wanted || object_key.ends_with(&format!("/{wanted}"))
}

/// File-list entries may be `s3://` URLs, HTTPS URLs or paths.
fn file_list_key(entry: &str, location: &S3Location) -> String {
    if let Some(rest) = entry.strip_prefix("s3://") {
        return rest
            .split_once('/')
            .map(|(_, key)| key.to_string())
            .unwrap_or_default();
    }
    let bucket_url = format!("{}/{}/", location.endpoint, location.bucket);
    if let Some(key) = entry.strip_prefix(&bucket_url) {
        return key.to_string();
    }
    entry.trim_start_matches('/').to_string()
}

/// Reads a `.txt` list (one entry per line) or a `.csv` list (first column, header skipped).
pub(crate) fn read_file_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read file list {}", path.display()))?;
    let is_csv = path.extension().is_some_and(|e| e == "csv");
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            if is_csv {
                let first = l.split(',').next().unwrap_or_default().trim();
                (first != "filename").then(|| first.to_string())
            } else {
                Some(l.to_string())
            }
        })
        .collect())
}

pub(crate) fn output_path(request: &GetRequest, key: &str) -> PathBuf {
    if request.no_directories {
        let name = key.rsplit('/').next().unwrap_or(key);
        request.output_directory.join(name)
    } else {
        request
            .output_directory
            .join(key.strip_prefix(NATIVE_PREFIX).unwrap_or(key))
    }
}

fn is_up_to_date(path: &Path, object: &S3Object) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if meta.len() != object.size {
        return false;
    }
    meta.modified()
        .map(|m| DateTime::<Utc>::from(m) >= object.last_modified)
        .unwrap_or(false)
}

struct PlannedFile {
    file: FileGet,
    size: u64,
}

/// Decides the local path and status of every object; `sync` drops up-to-date files.
fn plan_files(objects: &[S3Object], location: &S3Location, request: &GetRequest) -> Vec<PlannedFile> {
    let mut reserved: HashSet<PathBuf> = HashSet::new();
    let mut planned = Vec::with_capacity(objects.len());
    for object in objects {
        let wanted = output_path(request, &object.key);
        let exists = wanted.exists();

        let (path, status) = if request.sync {
            if is_up_to_date(&wanted, object) {
                debug!(path = %wanted.display(), "up to date, skipping");
                continue;
            }
            let status = if exists {
                FileStatus::Overwritten
            } else {
                FileStatus::Downloaded
            };
            (wanted, status)
        } else if exists && request.skip_existing {
            (wanted, FileStatus::Ignored)
        } else if exists && request.overwrite {
            (wanted, FileStatus::Overwritten)
        } else {
            let path = next_free_path(&wanted, |p| p.exists() || reserved.contains(p));
            (path, FileStatus::Downloaded)
        };
        reserved.insert(path.clone());

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_format = Path::new(&object.key)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        planned.push(PlannedFile {
            file: FileGet {
                s3_url: location.s3_url(&object.key),
                https_url: location.https_url(&object.key),
                file_size: bytes_to_megabytes(object.size),
                last_modified_datetime: object
                    .last_modified
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                etag: object.etag.clone(),
                file_format,
                output_directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                filename,
                file_path: path,
                file_status: status,
            },
            size: object.size,
        });
    }
    planned
}

fn write_file_list(path: &Path, files: &[PlannedFile]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut out = std::fs::File::create(path)
        .with_context(|| format!("failed to create file list {}", path.display()))?;
    let is_csv = path.extension().is_some_and(|e| e == "csv");
    if is_csv {
        writeln!(out, "filename,size,last_modified_datetime,etag")?;
    }
    for planned in files {
        let f = &planned.file;
        if is_csv {
            writeln!(
                out,
                "{},{},{},{}",
                f.s3_url, planned.size, f.last_modified_datetime, f.etag
            )?;
        } else {
            writeln!(out, "{}", f.s3_url)?;
        }
    }
    Ok(())
}

/// Local files under the dataset output directory that the listing no longer has.
fn files_to_delete(root: &Path, keep: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if root.is_dir() {
        walk_files(root, &mut found)?;
    }
    found.retain(|p| !keep.contains(p));
    found.sort();
    Ok(found)
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn response(files: Vec<FileGet>, total: u64, status: StatusCode) -> ResponseGet {
    let number_of_files_to_download = files
        .iter()
        .filter(|f| f.file_status != FileStatus::Ignored)
        .count();
    ResponseGet {
        files,
        files_deleted: None,
        files_not_found: None,
        number_of_files_to_download,
        total_size: bytes_to_megabytes(total),
        status,
        message: status.message().to_string(),
    }
}

impl Client {
    /// Runs a resolved `get` request against the original-files service.
    pub(crate) fn get_original_files(
        &self,
        request: &GetRequest,
        service: &Service,
    ) -> Result<ResponseGet> {
        let location = S3Location::parse(&service.uri)?;
        let prefix = location.dataset_prefix();
        info!(bucket = %location.bucket, prefix = %prefix, "listing files");
        let objects = self.list_objects(&location, &prefix)?;

        let file_list = request.file_list.as_deref().map(read_file_list).transpose()?;
        let (selected, not_found) =
            select_objects(objects, &location, request, file_list.as_deref())?;
        for entry in &not_found {
            warn!(entry = %entry, "file list entry not found in the dataset");
        }

        let planned = plan_files(&selected, &location, request);
        let total: u64 = planned
            .iter()
            .filter(|p| p.file.file_status != FileStatus::Ignored)
            .map(|p| p.size)
            .sum();

        let files_deleted = if request.sync_delete {
            let keep: HashSet<PathBuf> = selected
                .iter()
                .map(|o| output_path(request, &o.key))
                .collect();
            let root = output_path(request, prefix.trim_end_matches('/'));
            let stale = files_to_delete(&root, &keep)?;
            if !request.dry_run {
                for path in &stale {
                    info!(path = %path.display(), "deleting file absent from the remote");
                    std::fs::remove_file(path)
                        .with_context(|| format!("failed to delete {}", path.display()))?;
                }
            }
            Some(stale)
        } else {
            None
        };

        let finish = |status: StatusCode, planned: Vec<PlannedFile>| {
            let mut resp = response(planned.into_iter().map(|p| p.file).collect(), total, status);
            resp.files_deleted = files_deleted.clone();
            if file_list.is_some() {
                resp.files_not_found = Some(not_found.clone());
            }
            resp
        };

        if planned.is_empty() {
            info!("no file to download");
            return Ok(finish(StatusCode::NoDataToDownload, planned));
        }

        if let Some(name) = &request.create_file_list {
            let path = request.output_directory.join(name);
            write_file_list(&path, &planned)?;
            info!(path = %path.display(), files = planned.len(), "file list written");
            return Ok(finish(StatusCode::FileListCreated, planned));
        }

        if request.dry_run {
            return Ok(finish(StatusCode::DryRun, planned));
        }

        let to_download: Vec<(RemoteFile, PathBuf)> = planned
            .iter()
            .filter(|p| p.file.file_status != FileStatus::Ignored)
            .map(|p| {
                (
                    RemoteFile {
                        location: p.file.https_url.clone(),
                        content_length: p.size,
                    },
                    p.file.file_path.clone(),
                )
            })
            .collect();
        info!(
            files = to_download.len(),
            megabytes = bytes_to_megabytes(total),
            "downloading"
        );

        let pb = self.progress_bar(
            total,
            "{msg} [{elapsed_precise}] {bar:40} {bytes}/{total_bytes} ({eta})",
        );
        if let Some(pb) = &pb {
            pb.set_message("Downloading");
        }
        try_run_concurrently(self.max_concurrent_requests(), to_download, |(file, path)| {
            self.download(&file, &path, pb.as_ref())
        })?;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        Ok(finish(StatusCode::Success, planned))
    }
}
