//! One function per command: resolve the request, open a session, run it.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::CacheMode;
use crate::client::{Client, ClientConfig};
use crate::config::{CredentialsSource, resolve_credentials};
use crate::describe::{check_fields, describe_catalogue};
use crate::error::Error;
use crate::fields::validate_fields;
use crate::models::{CopernicusMarineCatalogue, Part, ServiceName};
use crate::request::{DescribeRequest, GetRequest, LoginRequest, SplitOn, SubsetRequest};
use crate::response::{ResponseGet, ResponseSubset};
use crate::services::select_get_service;
use crate::subset::{plan_subset, split_request};

/// Describes the catalogue, or the part of it `request` narrows down to.
pub fn describe(request: DescribeRequest) -> Result<Value> {
    check_fields(&request)?;
    let client = Client::new(request.client_config())?;
    let catalogue = client.fetch_catalogue(
        request.product_id.as_deref(),
        request.dataset_id.as_deref(),
    )?;
    describe_catalogue(catalogue, &request)
}

/// Downloads original files of a dataset.
pub fn get(request: GetRequest) -> Result<ResponseGet> {
    let request = request.resolve()?;
    validate_fields(&request.response_fields, false)?;
    let client = authenticated_client(request.client_config(), &request.credentials_source())?;
    let part = fetch_part(
        &client,
        request.dataset_id(),
        request.dataset_version.as_deref(),
        request.dataset_part.as_deref(),
    )?;
    let requested = request
        .service
        .as_deref()
        .map(str::parse::<ServiceName>)
        .transpose()?;
    let service = select_get_service(&part, requested)?;
    client.get_original_files(&request, service)
}

/// Subsets an ARCO dataset into a local Zarr store.
pub fn subset(request: SubsetRequest) -> Result<ResponseSubset> {
    let request = request.resolve()?;
    validate_fields(&request.response_fields, false)?;
    let client = authenticated_client(request.client_config(), &request.credentials_source())?;
    let part = fetch_part(
        &client,
        request.dataset_id(),
        request.dataset_version.as_deref(),
        request.dataset_part.as_deref(),
    )?;
    client.subset_part(request.dataset_id(), &part, &request)
}

/// Subsets per calendar period or per variable, one output each.
pub fn subset_split_on(request: SubsetRequest, on: SplitOn) -> Result<Vec<ResponseSubset>> {
    let request = request.resolve()?;
    validate_fields(&request.response_fields, false)?;
    let client = authenticated_client(request.client_config(), &request.credentials_source())?;
    let dataset_id = request.dataset_id();
    let part = fetch_part(
        &client,
        dataset_id,
        request.dataset_version.as_deref(),
        request.dataset_part.as_deref(),
    )?;
    let plan = plan_subset(&part, &request)?;
    let partitions = split_request(&request, dataset_id, &plan, on)?;
    if partitions.is_empty() {
        return Err(Error::NoDataToDownload(format!(
            "the selection of '{dataset_id}' yields nothing to split"
        ))
        .into());
    }
    info!(partitions = partitions.len(), "split subset request");
    partitions
        .iter()
        .map(|partition| {
            partition.validate()?;
            client.subset_part(dataset_id, &part, partition)
        })
        .collect()
}

/// Checks or stores credentials. `Ok(false)` when the login did not succeed.
pub fn login(request: LoginRequest) -> Result<bool> {
    let client = Client::new(ClientConfig {
        progress: false,
        cache_mode: CacheMode::Disabled,
        ..ClientConfig::default()
    })?;
    client.login(&request)
}

fn authenticated_client(config: ClientConfig, source: &CredentialsSource) -> Result<Client> {
    let credentials = resolve_credentials(source)?;
    let client = Client::new(config)?;
    client.ensure_valid_credentials(&credentials)?;
    info!(username = %credentials.username, "credentials validated");
    Ok(client.with_username(&credentials.username))
}

fn fetch_part(
    client: &Client,
    dataset_id: &str,
    version: Option<&str>,
    part: Option<&str>,
) -> Result<Part> {
    let catalogue = client.fetch_catalogue(None, Some(dataset_id))?;
    find_part(&catalogue, dataset_id, version, part).map_err(Into::into)
}

/// The requested (or default) version and part of `dataset_id`.
pub(crate) fn find_part(
    catalogue: &CopernicusMarineCatalogue,
    dataset_id: &str,
    version: Option<&str>,
    part: Option<&str>,
) -> Result<Part, Error> {
    let (_, dataset) = catalogue
        .find_dataset(dataset_id)
        .ok_or_else(|| Error::DatasetNotFound(dataset_id.to_string()))?;
    let version = dataset.select_version(version)?;
    let part = version.select_part(part)?;
    let now = Utc::now();
    if let Some(retired) = part.retired(now) {
        warn!(
            dataset = dataset_id,
            version = %version.label,
            retired = %retired.to_rfc3339(),
            "this dataset version is retired"
        );
    } else if !part.is_released(now) {
        warn!(dataset = dataset_id, version = %version.label, "this dataset version is not released yet");
    }
    info!(dataset = dataset_id, version = %version.label, part = %part.name, "selected dataset part");
    Ok(part.clone())
}
