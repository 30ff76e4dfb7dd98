//! Typed requests of every command, request files and templates.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cache::CacheMode;
use crate::client::{ClientConfig, DEFAULT_MAX_CONCURRENT_REQUESTS};
use crate::config::CredentialsSource;
use crate::error::Error;
use crate::models::ServiceName;
use crate::time::parse_datetime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinatesSelectionMethod {
    /// Grid points within the requested bounds.
    #[default]
    Inside,
    /// Like `inside`, but bounds beyond the dataset extent are an error.
    StrictInside,
    /// Bounds snap to the nearest grid points.
    Nearest,
    /// Smallest grid interval containing the bounds.
    Outside,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAxis {
    #[default]
    Depth,
    Elevation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Zarr,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Zarr => ".zarr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SplitOn {
    Year,
    Month,
    Day,
    Variable,
}

/// Session options shared by every command that reaches the data store.
fn client_config(
    staging: bool,
    disable_progress_bar: bool,
    max_concurrent_requests: usize,
    no_metadata_cache: bool,
    overwrite_metadata_cache: bool,
) -> ClientConfig {
    ClientConfig {
        staging,
        progress: !disable_progress_bar,
        max_concurrent_requests,
        cache_mode: if no_metadata_cache {
            CacheMode::Disabled
        } else if overwrite_metadata_cache {
            CacheMode::Overwrite
        } else {
            CacheMode::Enabled
        },
        ..ClientConfig::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeRequest {
    pub include_description: bool,
    pub include_datasets: bool,
    pub include_keywords: bool,
    pub include_versions: bool,
    pub include_all: bool,
    pub contains: Vec<String>,
    pub product_id: Option<String>,
    pub dataset_id: Option<String>,
    pub returned_fields: Vec<String>,
    pub returned_fields_exclude: Vec<String>,
    pub max_concurrent_requests: usize,
    pub disable_progress_bar: bool,
    pub staging: bool,
    pub no_metadata_cache: bool,
    pub overwrite_metadata_cache: bool,
}

impl Default for DescribeRequest {
    fn default() -> Self {
        Self {
            include_description: false,
            include_datasets: false,
            include_keywords: false,
            include_versions: false,
            include_all: false,
            contains: Vec::new(),
            product_id: None,
            dataset_id: None,
            returned_fields: Vec::new(),
            returned_fields_exclude: Vec::new(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            disable_progress_bar: false,
            staging: false,
            no_metadata_cache: false,
            overwrite_metadata_cache: false,
        }
    }
}

impl DescribeRequest {
    pub(crate) fn client_config(&self) -> ClientConfig {
        client_config(
            self.staging,
            self.disable_progress_bar,
            self.max_concurrent_requests,
            self.no_metadata_cache,
            self.overwrite_metadata_cache,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRequest {
    pub dataset_id: Option<String>,
    pub dataset_version: Option<String>,
    pub dataset_part: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub output_directory: PathBuf,
    pub no_directories: bool,
    pub overwrite: bool,
    pub skip_existing: bool,
    pub service: Option<String>,
    pub filter: Option<String>,
    pub regex: Option<String>,
    pub file_list: Option<PathBuf>,
    pub create_file_list: Option<String>,
    pub sync: bool,
    pub sync_delete: bool,
    pub index_parts: bool,
    pub dry_run: bool,
    pub max_concurrent_requests: usize,
    pub disable_progress_bar: bool,
    pub staging: bool,
    pub no_metadata_cache: bool,
    pub overwrite_metadata_cache: bool,
    pub response_fields: Vec<String>,
    #[serde(skip)]
    pub request_file: Option<PathBuf>,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            dataset_id: None,
            dataset_version: None,
            dataset_part: None,
            username: None,
            password: None,
            credentials_file: None,
            output_directory: PathBuf::from("."),
            no_directories: false,
            overwrite: false,
            skip_existing: false,
            service: None,
            filter: None,
            regex: None,
            file_list: None,
            create_file_list: None,
            sync: false,
            sync_delete: false,
            index_parts: false,
            dry_run: false,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            disable_progress_bar: false,
            staging: false,
            no_metadata_cache: false,
            overwrite_metadata_cache: false,
            response_fields: Vec::new(),
            request_file: None,
        }
    }
}

impl GetRequest {
    /// Merges the request file (if any) and checks argument combinations.
    pub fn resolve(self) -> Result<Self> {
        let mut request = match &self.request_file {
            Some(path) => merge_with_request_file(&self, path)?,
            None => self,
        };
        if request.sync_delete {
            request.sync = true;
        }
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<()> {
        if self.dataset_id.as_deref().is_none_or(str::is_empty) {
            bail!("a dataset id is required (--dataset-id or a request file)");
        }
        if self.overwrite && self.skip_existing {
            return Err(Error::MutuallyExclusiveArguments(
                "'overwrite' and 'skip_existing' cannot be used together".to_string(),
            )
            .into());
        }
        if self.sync_delete && self.no_directories {
            return Err(Error::MutuallyExclusiveArguments(
                "'sync_delete' and 'no_directories' cannot be used together".to_string(),
            )
            .into());
        }
        if self.sync && self.dataset_version.is_none() {
            return Err(Error::SyncRequiresDatasetVersion(
                "pass --dataset-version to use --sync or --sync-delete".to_string(),
            )
            .into());
        }
        if let Some(list) = &self.create_file_list {
            if !(list.ends_with(".txt") || list.ends_with(".csv")) {
                return Err(Error::IncorrectFileListExtension(format!(
                    "'{list}' must end with .txt or .csv"
                ))
                .into());
            }
        }
        if let Some(service) = &self.service {
            service.parse::<ServiceName>()?;
        }
        Ok(())
    }

    pub fn dataset_id(&self) -> &str {
        self.dataset_id.as_deref().unwrap_or_default()
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        client_config(
            self.staging,
            self.disable_progress_bar,
            self.max_concurrent_requests,
            self.no_metadata_cache,
            self.overwrite_metadata_cache,
        )
    }

    pub(crate) fn credentials_source(&self) -> CredentialsSource {
        CredentialsSource {
            username: self.username.clone(),
            password: self.password.clone(),
            credentials_file: self.credentials_file.clone(),
            prompt: true,
        }
    }

    pub fn template() -> Self {
        Self {
            dataset_id: Some("cmems_mod_glo_phy-thetao_anfc_0.083deg_P1D-m".to_string()),
            dataset_version: Some("202406".to_string()),
            filter: Some("*/2024/01/*".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetRequest {
    pub dataset_id: Option<String>,
    pub dataset_version: Option<String>,
    pub dataset_part: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub variables: Vec<String>,
    pub minimum_longitude: Option<f64>,
    pub maximum_longitude: Option<f64>,
    pub minimum_latitude: Option<f64>,
    pub maximum_latitude: Option<f64>,
    pub minimum_depth: Option<f64>,
    pub maximum_depth: Option<f64>,
    pub vertical_axis: VerticalAxis,
    pub start_datetime: Option<String>,
    pub end_datetime: Option<String>,
    pub platform_ids: Vec<String>,
    pub coordinates_selection_method: CoordinatesSelectionMethod,
    pub output_filename: Option<String>,
    pub output_directory: PathBuf,
    pub file_format: FileFormat,
    pub service: Option<String>,
    pub overwrite: bool,
    pub skip_existing: bool,
    pub dry_run: bool,
    pub raise_if_updating: bool,
    pub max_concurrent_requests: usize,
    pub disable_progress_bar: bool,
    pub staging: bool,
    pub no_metadata_cache: bool,
    pub overwrite_metadata_cache: bool,
    pub response_fields: Vec<String>,
    #[serde(skip)]
    pub request_file: Option<PathBuf>,
}

impl Default for SubsetRequest {
    fn default() -> Self {
        Self {
            dataset_id: None,
            dataset_version: None,
            dataset_part: None,
            username: None,
            password: None,
            credentials_file: None,
            variables: Vec::new(),
            minimum_longitude: None,
            maximum_longitude: None,
            minimum_latitude: None,
            maximum_latitude: None,
            minimum_depth: None,
            maximum_depth: None,
            vertical_axis: VerticalAxis::Depth,
            start_datetime: None,
            end_datetime: None,
            platform_ids: Vec::new(),
            coordinates_selection_method: CoordinatesSelectionMethod::Inside,
            output_filename: None,
            output_directory: PathBuf::from("."),
            file_format: FileFormat::Zarr,
            service: None,
            overwrite: false,
            skip_existing: false,
            dry_run: false,
            raise_if_updating: false,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            disable_progress_bar: false,
            staging: false,
            no_metadata_cache: false,
            overwrite_metadata_cache: false,
            response_fields: Vec::new(),
            request_file: None,
        }
    }
}

impl SubsetRequest {
    pub fn resolve(self) -> Result<Self> {
        let request = match &self.request_file {
            Some(path) => merge_with_request_file(&self, path)?,
            None => self,
        };
        request.validate()?;
        Ok(request)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dataset_id.as_deref().is_none_or(str::is_empty) {
            bail!("a dataset id is required (--dataset-id or a request file)");
        }
        if self.overwrite && self.skip_existing {
            return Err(Error::MutuallyExclusiveArguments(
                "'overwrite' and 'skip_existing' cannot be used together".to_string(),
            )
            .into());
        }
        if let (Some(min), Some(max)) = (self.minimum_longitude, self.maximum_longitude) {
            if min > max {
                return Err(Error::MinimumLongitudeGreaterThanMaximumLongitude(format!(
                    "{min} > {max}"
                ))
                .into());
            }
        }
        if let (Some(min), Some(max)) = (self.minimum_latitude, self.maximum_latitude) {
            if min > max {
                return Err(Error::MinimumLatitudeGreaterThanMaximumLatitude(format!(
                    "{min} > {max}"
                ))
                .into());
            }
        }
        if let (Some(min), Some(max)) = (self.minimum_depth, self.maximum_depth) {
            if min > max {
                return Err(
                    Error::MinimumDepthGreaterThanMaximumDepth(format!("{min} > {max}")).into(),
                );
            }
        }
        for depth in [self.minimum_depth, self.maximum_depth].into_iter().flatten() {
            if depth < 0.0 {
                return Err(Error::CoordinatesOutOfDatasetBounds(format!(
                    "depth {depth} is negative; depths are positive downwards"
                ))
                .into());
            }
        }
        let start = self.start_datetime.as_deref().map(parse_datetime).transpose()?;
        let end = self.end_datetime.as_deref().map(parse_datetime).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::StartDatetimeAfterEndDatetime(format!(
                    "{} > {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                ))
                .into());
            }
        }
        if let Some(service) = &self.service {
            service.parse::<ServiceName>()?;
        }
        Ok(())
    }

    pub fn dataset_id(&self) -> &str {
        self.dataset_id.as_deref().unwrap_or_default()
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        client_config(
            self.staging,
            self.disable_progress_bar,
            self.max_concurrent_requests,
            self.no_metadata_cache,
            self.overwrite_metadata_cache,
        )
    }

    pub(crate) fn credentials_source(&self) -> CredentialsSource {
        CredentialsSource {
            username: self.username.clone(),
            password: self.password.clone(),
            credentials_file: self.credentials_file.clone(),
            prompt: true,
        }
    }

    pub fn template() -> Self {
        Self {
            dataset_id: Some("cmems_mod_glo_phy-thetao_anfc_0.083deg_P1D-m".to_string()),
            variables: vec!["thetao".to_string()],
            minimum_longitude: Some(-9.0),
            maximum_longitude: Some(5.0),
            minimum_latitude: Some(33.0),
            maximum_latitude: Some(40.0),
            minimum_depth: Some(0.0),
            maximum_depth: Some(10.0),
            start_datetime: Some("2024-01-01".to_string()),
            end_datetime: Some("2024-01-31".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub configuration_file_directory: Option<PathBuf>,
    pub overwrite_configuration_file: bool,
    pub check_credentials_valid: bool,
    pub skip_if_user_logged_in: bool,
}

/// Keys of older request files and what they became; `None` keys are dropped.
const DEPRECATED_KEYS: &[(&str, Option<&str>)] = &[
    ("force_dataset_version", Some("dataset_version")),
    ("force_dataset_part", Some("dataset_part")),
    ("force_service", Some("service")),
    ("overwrite_output_data", Some("overwrite")),
    ("output_dir", Some("output_directory")),
    ("force_download", None),
    ("force_product_id", None),
];

fn remap_deprecated_keys(mut map: Map<String, Value>) -> Map<String, Value> {
    for (old, new) in DEPRECATED_KEYS {
        let Some(value) = map.remove(*old) else {
            continue;
        };
        match new {
            Some(new) => {
                warn!("request file key '{old}' is deprecated, use '{new}'");
                map.entry(new.to_string()).or_insert(value);
            }
            None => warn!("request file key '{old}' is deprecated and ignored"),
        }
    }
    map
}

/// Values of `explicit` that differ from the defaults override the file.
pub(crate) fn merge_with_request_file<T>(explicit: &T, path: &Path) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    let file: Value = serde_json::from_str(&text)
        .with_context(|| format!("request file {} is not valid JSON", path.display()))?;
    let Value::Object(file) = file else {
        bail!("request file {} must contain a JSON object", path.display());
    };
    merge_values(explicit, file)
}

fn merge_values<T>(explicit: &T, file: Map<String, Value>) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let Value::Object(defaults) = serde_json::to_value(T::default())? else {
        bail!("request is not a JSON object");
    };
    let Value::Object(explicit) = serde_json::to_value(explicit)? else {
        bail!("request is not a JSON object");
    };

    let mut merged = Map::new();
    for (key, value) in remap_deprecated_keys(file) {
        if defaults.contains_key(&key) {
            merged.insert(key, value);
        } else {
            warn!("ignoring unknown request file key '{key}'");
        }
    }
    for (key, value) in explicit {
        if defaults.get(&key) != Some(&value) {
            merged.insert(key, value);
        }
    }
    serde_json::from_value(Value::Object(merged)).context("invalid request file content")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Get,
    Subset,
}

/// Writes `get_template.json` or `subset_template.json` into `directory`.
pub fn create_template(kind: TemplateKind, directory: &Path) -> Result<PathBuf> {
    let (name, body) = match kind {
        TemplateKind::Get => (
            "get_template.json",
            serde_json::to_string_pretty(&GetRequest::template())?,
        ),
        TemplateKind::Subset => (
            "subset_template.json",
            serde_json::to_string_pretty(&SubsetRequest::template())?,
        ),
    };
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create directory {}", directory.display()))?;
    let path = directory.join(name);
    std::fs::write(&path, body + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn kind(err: anyhow::Error) -> &'static str {
        err.downcast_ref::<Error>().map(Error::kind).unwrap_or("other")
    }

    #[test]
    fn explicit_arguments_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            json!({
                "dataset_id": "from_file",
                "variables": ["so"],
                "minimum_longitude": -10.0,
                "force_dataset_version": "202211",
                "overwrite_output_data": true,
                "output_dir": "data",
                "force_download": true,
                "something_else": 1
            })
            .to_string(),
        )
        .unwrap();

        let explicit = SubsetRequest {
            variables: vec!["thetao".into()],
            request_file: Some(path),
            ..SubsetRequest::default()
        };
        let merged = explicit.resolve().unwrap();
        assert_eq!(merged.dataset_id(), "from_file");
        assert_eq!(merged.variables, vec!["thetao".to_string()]);
        assert_eq!(merged.minimum_longitude, Some(-10.0));
        assert_eq!(merged.dataset_version.as_deref(), Some("202211"));
        assert!(merged.overwrite);
        assert_eq!(merged.output_directory, PathBuf::from("data"));
    }

    #[test]
    fn get_validation() {
        let base = GetRequest {
            dataset_id: Some("d".into()),
            ..GetRequest::default()
        };
        let err = GetRequest {
            overwrite: true,
            skip_existing: true,
            ..base.clone()
        }
        .resolve()
        .unwrap_err();
        assert_eq!(kind(err), "MutuallyExclusiveArguments");

        let err = GetRequest {
            sync_delete: true,
            ..base.clone()
        }
        .resolve()
        .unwrap_err();
        assert_eq!(kind(err), "SyncRequiresDatasetVersion");

        let err = GetRequest {
            sync_delete: true,
            no_directories: true,
            dataset_version: Some("202211".into()),
            ..base.clone()
        }
        .resolve()
        .unwrap_err();
        assert_eq!(kind(err), "MutuallyExclusiveArguments");

        let err = GetRequest {
            create_file_list: Some("files.json".into()),
            ..base.clone()
        }
        .resolve()
        .unwrap_err();
        assert_eq!(kind(err), "IncorrectFileListExtension");

        let ok = GetRequest {
            sync_delete: true,
            dataset_version: Some("202211".into()),
            ..base
        }
        .resolve()
        .unwrap();
        assert!(ok.sync);
    }

    #[test]
    fn subset_validation() {
        let base = SubsetRequest {
            dataset_id: Some("d".into()),
            ..SubsetRequest::default()
        };
        let cases = [
            (
                SubsetRequest {
                    minimum_longitude: Some(10.0),
                    maximum_longitude: Some(0.0),
                    ..base.clone()
                },
                "MinimumLongitudeGreaterThanMaximumLongitude",
            ),
            (
                SubsetRequest {
                    minimum_latitude: Some(10.0),
                    maximum_latitude: Some(0.0),
                    ..base.clone()
                },
                "MinimumLatitudeGreaterThanMaximumLatitude",
            ),
            (
                SubsetRequest {
                    minimum_depth: Some(10.0),
                    maximum_depth: Some(0.0),
                    ..base.clone()
                },
                "MinimumDepthGreaterThanMaximumDepth",
            ),
            (
                SubsetRequest {
                    start_datetime: Some("2023-02-01".into()),
                    end_datetime: Some("2023-01-01".into()),
                    ..base.clone()
                },
                "StartDatetimeAfterEndDatetime",
            ),
            (
                SubsetRequest {
                    start_datetime: Some("first of may".into()),
                    ..base.clone()
                },
                "WrongDatetimeFormat",
            ),
            (
                SubsetRequest {
                    service: Some("ftp".into()),
                    ..base.clone()
                },
                "ServiceNotSupported",
            ),
        ];
        for (request, expected) in cases {
            assert_eq!(kind(request.validate().unwrap_err()), expected);
        }
        assert!(base.validate().is_ok());
    }

    #[test]
    fn templates_round_trip_as_requests() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_template(TemplateKind::Subset, dir.path()).unwrap();
        assert!(path.ends_with("subset_template.json"));
        let parsed: SubsetRequest =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, SubsetRequest::template());

        let path = create_template(TemplateKind::Get, dir.path()).unwrap();
        let parsed: GetRequest =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.dataset_version.as_deref(), Some("202406"));
    }
}
