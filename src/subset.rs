//! Subsetting an ARCO dataset part into a local Zarr store.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::arco::{HttpStore, plan_arrays, write_zarr};
use crate::client::Client;
use crate::download::partial_path;
use crate::error::Error;
use crate::models::{CoordinateAxis, Part, Service, ServiceFormat, ServiceName, Variable};
use crate::request::{SplitOn, SubsetRequest, VerticalAxis};
use crate::response::{FileStatus, ResponseSubset, StatusCode};
use crate::selection::{AxisSelection, select_axes};
use crate::services::{SubsetShape, chunk_span, select_subset_service};
use crate::time::{Granularity, TimeUnits, parse_datetime, period_bounds};
use crate::util::{bytes_to_megabytes, next_available_path};

/// Service, variables and index selections answering a subset request.
#[derive(Debug, Clone)]
pub(crate) struct SubsetPlan<'a> {
    pub(crate) service: &'a Service,
    pub(crate) variables: Vec<&'a Variable>,
    pub(crate) axes: Vec<AxisSelection>,
}

impl SubsetPlan<'_> {
    pub(crate) fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.short_name.clone()).collect()
    }

    fn axis(&self, axis: CoordinateAxis) -> Option<&AxisSelection> {
        self.axes
            .iter()
            .find(|a| a.axis == axis && a.selection.is_some())
    }
}

/// Variables of `service` named by `names` (short or standard name), all when empty.
pub(crate) fn select_variables<'a>(
    service: &'a Service,
    names: &[String],
) -> Result<Vec<&'a Variable>, Error> {
    if names.is_empty() {
        return Ok(service.variables.iter().collect());
    }
    let mut out: Vec<&Variable> = Vec::with_capacity(names.len());
    for name in names {
        let variable = service.variable(name).ok_or_else(|| {
            Error::VariableDoesNotExistInTheDataset(format!(
                "'{name}' (available: {})",
                service
                    .variables
                    .iter()
                    .map(|v| v.short_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        if !out.iter().any(|v| v.short_name == variable.short_name) {
            out.push(variable);
        }
    }
    Ok(out)
}

fn estimate_chunks(service: &Service, request: &SubsetRequest) -> Option<u64> {
    let variables = select_variables(service, &request.variables).ok()?;
    let axes = select_axes(&variables, request).ok()?;
    let mut total = 0;
    for variable in variables {
        let mut chunks = 1;
        for c in &variable.coordinates {
            let length = c.chunking_length?;
            let range = &axes
                .iter()
                .find(|a| a.coordinate_id == c.coordinate_id)?
                .selection
                .as_ref()?
                .range;
            chunks *= chunk_span(range, length);
        }
        total += chunks;
    }
    Some(total)
}

fn single_point(request: &SubsetRequest) -> bool {
    let same = |a: Option<f64>, b: Option<f64>| matches!((a, b), (Some(a), Some(b)) if a == b);
    same(request.minimum_longitude, request.maximum_longitude)
        && same(request.minimum_latitude, request.maximum_latitude)
}

pub(crate) fn plan_subset<'a>(part: &'a Part, request: &SubsetRequest) -> Result<SubsetPlan<'a>> {
    let requested = request
        .service
        .as_deref()
        .map(str::parse::<ServiceName>)
        .transpose()?;
    let chunks = |service: &Service| estimate_chunks(service, request);
    let shape = SubsetShape {
        platform_ids_given: !request.platform_ids.is_empty(),
        single_point: single_point(request),
        chunks: &chunks,
    };
    let service = select_subset_service(part, requested, &shape)?;
    info!(service = %service.service_name, "selected service");
    let variables = select_variables(service, &request.variables)?;
    let axes = select_axes(&variables, request)?;
    Ok(SubsetPlan {
        service,
        variables,
        axes,
    })
}

pub(crate) fn check_updating(part: &Part, request: &SubsetRequest) -> Result<()> {
    let Some(updating) = part.updating_start() else {
        return Ok(());
    };
    let end = request.end_datetime.as_deref().map(parse_datetime).transpose()?;
    if end.is_some_and(|end| end < updating) {
        return Ok(());
    }
    let message = format!(
        "the dataset is being updated since {}, data after this date may change",
        updating.to_rfc3339()
    );
    if request.raise_if_updating {
        return Err(Error::DatasetUpdating(message).into());
    }
    warn!("{message}");
    Ok(())
}

fn format_longitude(value: f64) -> String {
    if value < 0.0 {
        format!("{:.2}W", -value)
    } else {
        format!("{value:.2}E")
    }
}

fn format_latitude(value: f64) -> String {
    if value < 0.0 {
        format!("{:.2}S", -value)
    } else {
        format!("{value:.2}N")
    }
}

fn time_bounds(axis: &AxisSelection) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let s = axis.selection.as_ref()?;
    let units = TimeUnits::parse(&axis.units)?;
    Some((units.to_datetime(s.minimum), units.to_datetime(s.maximum)))
}

/// `<dataset_id>_<vars>_<lon>_<lat>_<depth>_<time>`, without extension.
pub(crate) fn default_filename(dataset_id: &str, plan: &SubsetPlan<'_>) -> String {
    let names = plan.variable_names();
    let mut parts = vec![dataset_id.to_string()];
    if names.len() > 2 {
        parts.push("multi-vars".to_string());
    } else if !names.is_empty() {
        parts.push(names.join("-"));
    }
    if let Some(s) = plan.axis(CoordinateAxis::X).and_then(|a| a.selection.as_ref()) {
        parts.push(format!(
            "{}-{}",
            format_longitude(s.minimum),
            format_longitude(s.maximum)
        ));
    }
    if let Some(s) = plan.axis(CoordinateAxis::Y).and_then(|a| a.selection.as_ref()) {
        parts.push(format!(
            "{}-{}",
            format_latitude(s.minimum),
            format_latitude(s.maximum)
        ));
    }
    if let Some(s) = plan.axis(CoordinateAxis::Z).and_then(|a| a.selection.as_ref()) {
        let (a, b) = (s.minimum.abs(), s.maximum.abs());
        parts.push(format!("{:.2}-{:.2}m", a.min(b), a.max(b)));
    }
    if let Some((start, end)) = plan.axis(CoordinateAxis::T).and_then(time_bounds) {
        parts.push(format!(
            "{}-{}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ));
    }
    parts.join("_")
}

/// Output file name with the format extension, rejecting other known formats.
pub(crate) fn output_filename(
    request: &SubsetRequest,
    dataset_id: &str,
    plan: &SubsetPlan<'_>,
) -> Result<String, Error> {
    let name = request
        .output_filename
        .clone()
        .unwrap_or_else(|| default_filename(dataset_id, plan));
    let extension = request.file_format.extension();
    let lower = name.to_lowercase();
    if lower.ends_with(extension) {
        return Ok(name);
    }
    for other in [".nc", ".csv", ".parquet"] {
        if lower.ends_with(other) {
            return Err(Error::FormatNotSupported(format!(
                "'{name}': only Zarr ({extension}) output can be written"
            )));
        }
    }
    Ok(format!("{name}{extension}"))
}

fn output_target(request: &SubsetRequest, filename: &str) -> (PathBuf, FileStatus) {
    let path = request.output_directory.join(filename);
    if !path.exists() {
        return (path, FileStatus::Downloaded);
    }
    if request.skip_existing {
        (path, FileStatus::Ignored)
    } else if request.overwrite {
        (path, FileStatus::Overwritten)
    } else {
        (next_available_path(&path), FileStatus::Downloaded)
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Runs `write` into `<path>.part` and moves the result over `path` once it succeeded.
fn write_then_replace<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let partial = partial_path(path);
    remove_existing(&partial)?;
    if let Err(e) = write(&partial) {
        if let Err(cleanup) = remove_existing(&partial) {
            warn!(path = %partial.display(), error = %cleanup, "could not remove partial output");
        }
        return Err(e);
    }
    remove_existing(path)?;
    fs::rename(&partial, path)
        .with_context(|| format!("failed to move subset to {}", path.display()))?;
    Ok(())
}

/// Platform series and sqlite services hold per-platform observation tables, not gridded Zarr.
fn is_sparse(service: &Service) -> bool {
    service.service_name == ServiceName::ArcoPlatformSeries
        || service.service_format == Some(ServiceFormat::Sqlite)
}

impl Client {
    /// Subsets one part of `dataset_id` according to `request`.
    pub fn subset_part(
        &self,
        dataset_id: &str,
        part: &Part,
        request: &SubsetRequest,
    ) -> Result<ResponseSubset> {
        let plan = plan_subset(part, request)?;
        self.run_subset(dataset_id, part, &plan, request)
    }

    pub(crate) fn run_subset(
        &self,
        dataset_id: &str,
        part: &Part,
        plan: &SubsetPlan<'_>,
        request: &SubsetRequest,
    ) -> Result<ResponseSubset> {
        check_updating(part, request)?;
        let variables = plan.variable_names();
        let filename = output_filename(request, dataset_id, plan)?;
        let (path, file_status) = output_target(request, &filename);
        let mut response = ResponseSubset {
            output_directory: request.output_directory.clone(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(filename),
            file_path: path.clone(),
            file_size: None,
            data_transfer_size: None,
            variables: variables.clone(),
            coordinates_extent: plan.axes.iter().filter_map(AxisSelection::extent).collect(),
            status: StatusCode::Success,
            message: StatusCode::Success.message().to_string(),
            file_status,
        };
        let set_status = |response: &mut ResponseSubset, status: StatusCode| {
            response.status = status;
            response.message = status.message().to_string();
        };

        if is_sparse(plan.service) {
            if request.dry_run {
                set_status(&mut response, StatusCode::DryRun);
                return Ok(response);
            }
            return Err(Error::ServiceNotSupported(format!(
                "'{}' serves sparse observations, which can only be subset as a dry run",
                plan.service.service_name
            ))
            .into());
        }

        if file_status == FileStatus::Ignored && !request.dry_run {
            info!(path = %path.display(), "output exists, skipping");
            return Ok(response);
        }

        let store = Arc::new(HttpStore::new(self, &plan.service.uri));
        let elevation = request.vertical_axis == VerticalAxis::Elevation;
        let planned = plan_arrays(store.as_ref(), &variables, &plan.axes, elevation)?;
        response.file_size = Some(bytes_to_megabytes(
            planned.iter().map(|p| p.output_bytes()).sum(),
        ));
        response.data_transfer_size = Some(bytes_to_megabytes(
            planned.iter().map(|p| p.transfer_bytes()).sum(),
        ));
        info!(
            file_size_mb = response.file_size,
            transfer_size_mb = response.data_transfer_size,
            "estimated subset size"
        );

        if request.dry_run {
            set_status(&mut response, StatusCode::DryRun);
            return Ok(response);
        }

        let progress = self.progress_bar(
            0,
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} slabs",
        );
        write_then_replace(&path, |partial| {
            write_zarr(
                store,
                &planned,
                partial,
                self.max_concurrent_requests(),
                progress,
            )
        })?;
        info!(path = %path.display(), "subset written");
        Ok(response)
    }
}

/// Partitions `request` into one request per calendar period or variable.
pub(crate) fn split_request(
    request: &SubsetRequest,
    dataset_id: &str,
    plan: &SubsetPlan<'_>,
    on: SplitOn,
) -> Result<Vec<SubsetRequest>> {
    let base = match &request.output_filename {
        Some(name) => {
            let extension = request.file_format.extension();
            name.strip_suffix(extension).unwrap_or(name).to_string()
        }
        None => default_filename(dataset_id, plan),
    };
    let with_name = |suffix: &str| SubsetRequest {
        output_filename: Some(format!("{base}_{suffix}")),
        ..request.clone()
    };

    let granularity = match on {
        SplitOn::Variable => {
            return Ok(plan
                .variable_names()
                .into_iter()
                .map(|name| SubsetRequest {
                    variables: vec![name.clone()],
                    ..with_name(&name)
                })
                .collect());
        }
        SplitOn::Year => Granularity::Year,
        SplitOn::Month => Granularity::Month,
        SplitOn::Day => Granularity::Day,
    };

    let Some((first, last)) = plan.axis(CoordinateAxis::T).and_then(time_bounds) else {
        return Err(Error::NoDataToDownload(format!(
            "dataset '{dataset_id}' has no time coordinate to split on"
        ))
        .into());
    };
    let start = match request.start_datetime.as_deref() {
        Some(s) => parse_datetime(s)?.max(first),
        None => first,
    };
    let end = match request.end_datetime.as_deref() {
        Some(s) => parse_datetime(s)?.min(last),
        None => last,
    };

    let mut out = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let (period_start, next) = period_bounds(cursor, granularity);
        let period_end = (next - Duration::seconds(1)).min(end);
        out.push(SubsetRequest {
            start_datetime: Some(cursor.max(period_start).to_rfc3339()),
            end_datetime: Some(period_end.to_rfc3339()),
            ..with_name(&granularity.format(period_start))
        });
        cursor = next;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMode;
    use crate::client::ClientConfig;
    use crate::models::Coordinate;
    use pretty_assertions::assert_eq;

    fn coordinate(id: &str, axis: CoordinateAxis, min: f64, max: f64, step: f64) -> Coordinate {
        Coordinate {
            coordinate_id: id.into(),
            units: String::new(),
            axis,
            minimum_value: Some(min),
            maximum_value: Some(max),
            step: Some(step),
            values: None,
            chunking_length: None,
            chunk_type: None,
            chunk_reference_coordinate: None,
            chunk_geometric_factor: None,
        }
    }

    fn coordinates(time_chunk: u64, space_chunk: u64) -> Vec<Coordinate> {
        vec![
            Coordinate {
                units: "milliseconds since 1970-01-01 00:00:00".into(),
                chunking_length: Some(time_chunk),
                ..coordinate(
                    "time",
                    CoordinateAxis::T,
                    1_672_531_200_000.0,
                    1_680_220_800_000.0,
                    86_400_000.0,
                )
            },
            Coordinate {
                values: Some(vec![0.494, 1.541, 2.646, 100.0]),
                units: "m".into(),
                chunking_length: Some(1),
                ..coordinate("depth", CoordinateAxis::Z, 0.0, 0.0, 1.0)
            },
            Coordinate {
                chunking_length: Some(space_chunk),
                ..coordinate("latitude", CoordinateAxis::Y, -80.0, 90.0, 0.25)
            },
            Coordinate {
                chunking_length: Some(space_chunk),
                ..coordinate("longitude", CoordinateAxis::X, -180.0, 179.75, 0.25)
            },
        ]
    }

    fn service(name: ServiceName, time_chunk: u64, space_chunk: u64) -> Service {
        let variable = |short: &str, standard: &str| Variable {
            short_name: short.into(),
            standard_name: Some(standard.into()),
            coordinates: coordinates(time_chunk, space_chunk),
            ..Variable::default()
        };
        Service {
            service_name: name,
            service_short_name: name.short_name().into(),
            service_format: Some(ServiceFormat::Zarr),
            uri: format!("https://s3.example.org/bucket/{}.zarr", name.short_name()),
            variables: vec![
                variable("thetao", "sea_water_potential_temperature"),
                variable("so", "sea_water_salinity"),
                variable("uo", "eastward_sea_water_velocity"),
            ],
        }
    }

    fn part() -> Part {
        Part {
            name: "default".into(),
            services: vec![
                service(ServiceName::ArcoGeoSeries, 1, 512),
                service(ServiceName::ArcoTimeSeries, 365, 32),
            ],
            ..Part::default()
        }
    }

    fn request() -> SubsetRequest {
        SubsetRequest {
            dataset_id: Some("cmems_mod_glo_phy_anfc_0.083deg_P1D-m".into()),
            variables: vec!["thetao".into()],
            minimum_longitude: Some(-9.0),
            maximum_longitude: Some(5.0),
            minimum_latitude: Some(33.0),
            maximum_latitude: Some(40.0),
            minimum_depth: Some(0.0),
            maximum_depth: Some(100.0),
            start_datetime: Some("2023-01-01".into()),
            end_datetime: Some("2023-01-31".into()),
            ..SubsetRequest::default()
        }
    }

    #[test]
    fn variables_by_short_or_standard_name() {
        let s = service(ServiceName::ArcoGeoSeries, 1, 512);
        let names: Vec<_> = select_variables(&s, &["sea_water_salinity".into(), "so".into()])
            .unwrap()
            .iter()
            .map(|v| v.short_name.clone())
            .collect();
        assert_eq!(names, vec!["so"]);
        assert_eq!(select_variables(&s, &[]).unwrap().len(), 3);
        let err = select_variables(&s, &["chl".into()]).unwrap_err();
        assert_eq!(err.kind(), "VariableDoesNotExistInTheDataset");
    }

    #[test]
    fn plan_picks_fewer_chunks() {
        let part = part();
        let plan = plan_subset(&part, &request()).unwrap();
        // 31 days: geo series needs 31 time chunks, time series a single one
        assert_eq!(plan.service.service_name, ServiceName::ArcoTimeSeries);

        let single_day = SubsetRequest {
            end_datetime: Some("2023-01-01".into()),
            minimum_longitude: None,
            maximum_longitude: None,
            minimum_latitude: None,
            maximum_latitude: None,
            ..request()
        };
        let plan = plan_subset(&part, &single_day).unwrap();
        assert_eq!(plan.service.service_name, ServiceName::ArcoGeoSeries);

        let forced = SubsetRequest {
            service: Some("geoseries".into()),
            ..request()
        };
        let plan = plan_subset(&part, &forced).unwrap();
        assert_eq!(plan.service.service_name, ServiceName::ArcoGeoSeries);
    }

    #[test]
    fn default_and_explicit_names() {
        let part = part();
        let req = request();
        let plan = plan_subset(&part, &req).unwrap();
        assert_eq!(
            output_filename(&req, req.dataset_id(), &plan).unwrap(),
            "cmems_mod_glo_phy_anfc_0.083deg_P1D-m_thetao_9.00W-5.00E_33.00N-40.00N_0.49-100.00m_2023-01-01-2023-01-31.zarr"
        );

        let multi = SubsetRequest {
            variables: Vec::new(),
            ..req.clone()
        };
        let plan = plan_subset(&part, &multi).unwrap();
        assert!(default_filename("ds", &plan).starts_with("ds_multi-vars_"));

        let named = SubsetRequest {
            output_filename: Some("out".into()),
            ..req.clone()
        };
        assert_eq!(output_filename(&named, "ds", &plan).unwrap(), "out.zarr");
        let netcdf = SubsetRequest {
            output_filename: Some("out.nc".into()),
            ..req
        };
        let err = output_filename(&netcdf, "ds", &plan).unwrap_err();
        assert_eq!(err.kind(), "FormatNotSupported");
    }

    #[test]
    fn elevation_names_use_depth_values() {
        let part = part();
        let req = SubsetRequest {
            vertical_axis: VerticalAxis::Elevation,
            ..request()
        };
        let plan = plan_subset(&part, &req).unwrap();
        let name = default_filename("ds", &plan);
        assert!(name.contains("_0.49-100.00m_"), "{name}");
    }

    #[test]
    fn failed_write_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zarr");
        fs::create_dir(&path).unwrap();
        fs::write(path.join(".zgroup"), "old").unwrap();

        let err = write_then_replace(&path, |partial| {
            fs::create_dir_all(partial)?;
            anyhow::bail!("connection reset")
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(fs::read_to_string(path.join(".zgroup")).unwrap(), "old");
        assert!(!partial_path(&path).exists());

        write_then_replace(&path, |partial| {
            fs::create_dir_all(partial)?;
            fs::write(partial.join(".zgroup"), "new")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read_to_string(path.join(".zgroup")).unwrap(), "new");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn platform_series_subset_is_dry_run_only() {
        let dir = tempfile::tempdir().unwrap();
        let part = Part {
            name: "history".into(),
            services: vec![
                service(ServiceName::ArcoPlatformSeries, 365, 32),
                service(ServiceName::ArcoTimeSeries, 365, 32),
            ],
            ..Part::default()
        };
        let req = SubsetRequest {
            platform_ids: vec!["6102735".into()],
            output_directory: dir.path().to_path_buf(),
            ..request()
        };
        let client = Client::new(ClientConfig {
            progress: false,
            cache_mode: CacheMode::Disabled,
            ..ClientConfig::default()
        })
        .unwrap();

        let err = client.subset_part("ds", &part, &req).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>().unwrap().kind(),
            "ServiceNotSupported"
        );

        let dry = SubsetRequest {
            dry_run: true,
            ..req
        };
        let response = client.subset_part("ds", &part, &dry).unwrap();
        assert_eq!(response.status, StatusCode::DryRun);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn existing_output_handling() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("out.zarr")).unwrap();
        let req = SubsetRequest {
            output_directory: dir.path().to_path_buf(),
            ..request()
        };
        let (path, status) = output_target(&req, "out.zarr");
        assert_eq!(status, FileStatus::Downloaded);
        assert_eq!(path, dir.path().join("out_(1).zarr"));

        let skip = SubsetRequest {
            skip_existing: true,
            ..req.clone()
        };
        assert_eq!(output_target(&skip, "out.zarr").1, FileStatus::Ignored);
        let overwrite = SubsetRequest {
            overwrite: true,
            ..req
        };
        assert_eq!(output_target(&overwrite, "out.zarr").1, FileStatus::Overwritten);
    }

    #[test]
    fn updating_dataset() {
        let part = Part {
            arco_updating_start_date: Some("2023-01-15T00:00:00Z".into()),
            ..part()
        };
        assert!(check_updating(&part, &request()).is_ok());
        let raise = SubsetRequest {
            raise_if_updating: true,
            ..request()
        };
        let err = check_updating(&part, &raise).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>().unwrap().kind(), "DatasetUpdating");
        let before = SubsetRequest {
            end_datetime: Some("2023-01-10".into()),
            ..raise
        };
        assert!(check_updating(&part, &before).is_ok());
    }

    #[test]
    fn split_by_month_and_variable() {
        let part = part();
        let req = SubsetRequest {
            start_datetime: Some("2023-01-20".into()),
            end_datetime: Some("2023-03-05".into()),
            output_filename: Some("sst.zarr".into()),
            ..request()
        };
        let plan = plan_subset(&part, &req).unwrap();
        let parts = split_request(&req, req.dataset_id(), &plan, SplitOn::Month).unwrap();
        let names: Vec<_> = parts
            .iter()
            .map(|r| r.output_filename.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["sst_2023-01", "sst_2023-02", "sst_2023-03"]);
        assert_eq!(
            parts[0].start_datetime.as_deref(),
            Some("2023-01-20T00:00:00+00:00")
        );
        assert_eq!(
            parts[0].end_datetime.as_deref(),
            Some("2023-01-31T23:59:59+00:00")
        );
        assert_eq!(
            parts[2].end_datetime.as_deref(),
            Some("2023-03-05T00:00:00+00:00")
        );

        let req = SubsetRequest {
            variables: vec!["thetao".into(), "so".into()],
            ..req
        };
        let plan = plan_subset(&part, &req).unwrap();
        let parts = split_request(&req, req.dataset_id(), &plan, SplitOn::Variable).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].variables, vec!["so".to_string()]);
        assert_eq!(parts[1].output_filename.as_deref(), Some("sst_so"));
    }
}
