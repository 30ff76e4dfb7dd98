//! Structured results of `get` and `subset`, printed as JSON by the CLI.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::fields::project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    #[serde(rename = "000")]
    Success,
    #[serde(rename = "001")]
    DryRun,
    #[serde(rename = "002")]
    FileListCreated,
    #[serde(rename = "003")]
    NoDataToDownload,
}

impl StatusCode {
    pub fn code(&self) -> &'static str {
        match self {
            StatusCode::Success => "000",
            StatusCode::DryRun => "001",
            StatusCode::FileListCreated => "002",
            StatusCode::NoDataToDownload => "003",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Success => "The request was successful.",
            StatusCode::DryRun => "The request was run with the dry run option. No data was downloaded.",
            StatusCode::FileListCreated => "The file list was created. No data was downloaded.",
            StatusCode::NoDataToDownload => "No data to download from the remote matching the request.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Downloaded,
    Ignored,
    Overwritten,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGet {
    pub s3_url: String,
    pub https_url: String,
    /// Megabytes.
    pub file_size: f64,
    pub last_modified_datetime: String,
    pub etag: String,
    pub file_format: String,
    pub output_directory: PathBuf,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseGet {
    pub files: Vec<FileGet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_deleted: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_not_found: Option<Vec<String>>,
    pub number_of_files_to_download: usize,
    /// Megabytes, files to transfer only.
    pub total_size: f64,
    pub status: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatesExtent {
    pub coordinate_id: String,
    pub minimum: Value,
    pub maximum: Value,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSubset {
    pub file_path: PathBuf,
    pub output_directory: PathBuf,
    pub filename: String,
    /// Estimated size of the output in megabytes.
    pub file_size: Option<f64>,
    /// Estimated bytes fetched from the service, in megabytes.
    pub data_transfer_size: Option<f64>,
    pub variables: Vec<String>,
    pub coordinates_extent: Vec<CoordinatesExtent>,
    pub status: StatusCode,
    pub message: String,
    pub file_status: FileStatus,
}

/// Serializes a response keeping only `response_fields` (all when empty).
pub fn response_to_json<T: Serialize>(response: &T, response_fields: &[String]) -> Result<Value> {
    let value = serde_json::to_value(response)?;
    if response_fields.iter().any(|f| f == "all") {
        return Ok(value);
    }
    Ok(project(value, response_fields, &[]))
}
