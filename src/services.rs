//! Which service of a dataset part answers a `get` or `subset` request.

use std::ops::Range;
use tracing::debug;

use crate::error::Error;
use crate::models::{Part, Service, ServiceName};

const SUBSET_PREFERENCE: [ServiceName; 4] = [
    ServiceName::ArcoGeoSeries,
    ServiceName::ArcoTimeSeries,
    ServiceName::OmiArco,
    ServiceName::StaticArco,
];

fn available_names(part: &Part) -> String {
    part.services
        .iter()
        .map(|s| s.service_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn not_available(part: &Part, name: ServiceName) -> Error {
    Error::ServiceNotAvailable(format!(
        "service '{}' is not available for part '{}' (available: {})",
        name,
        part.name,
        available_names(part)
    ))
}

pub(crate) fn select_get_service(
    part: &Part,
    requested: Option<ServiceName>,
) -> Result<&Service, Error> {
    if let Some(name) = requested {
        if name != ServiceName::OriginalFiles {
            return Err(Error::ServiceNotSupported(format!(
                "'{name}' cannot be used with get, only '{}'",
                ServiceName::OriginalFiles
            )));
        }
    }
    part.service(ServiceName::OriginalFiles)
        .ok_or_else(|| not_available(part, ServiceName::OriginalFiles))
}

/// What the subset selection looks like, for choosing between chunkings.
pub(crate) struct SubsetShape<'f> {
    pub(crate) platform_ids_given: bool,
    /// A single longitude/latitude point was requested.
    pub(crate) single_point: bool,
    /// Chunks a service needs for the selection, when its chunking is known.
    pub(crate) chunks: &'f dyn Fn(&Service) -> Option<u64>,
}

pub(crate) fn select_subset_service<'a>(
    part: &'a Part,
    requested: Option<ServiceName>,
    shape: &SubsetShape<'_>,
) -> Result<&'a Service, Error> {
    if let Some(name) = requested {
        if !name.is_arco() {
            return Err(Error::ServiceNotSupported(format!(
                "'{name}' cannot be used with subset (supported: {})",
                ServiceName::ALL
                    .iter()
                    .filter(|n| n.is_arco())
                    .map(|n| n.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        return part.service(name).ok_or_else(|| not_available(part, name));
    }

    if part.is_sparse() {
        let platform = part.service(ServiceName::ArcoPlatformSeries);
        let time = part.service(ServiceName::ArcoTimeSeries);
        let chosen = if shape.platform_ids_given {
            platform.or(time)
        } else {
            time.or(platform)
        };
        return chosen.ok_or_else(|| not_available(part, ServiceName::ArcoTimeSeries));
    }

    if let (Some(geo), Some(time)) = (
        part.service(ServiceName::ArcoGeoSeries),
        part.service(ServiceName::ArcoTimeSeries),
    ) {
        let chosen = match ((shape.chunks)(geo), (shape.chunks)(time)) {
            (Some(geo_chunks), Some(time_chunks)) => {
                debug!(geo_chunks, time_chunks, "comparing chunkings");
                if time_chunks < geo_chunks { time } else { geo }
            }
            _ if shape.single_point => time,
            _ => geo,
        };
        return Ok(chosen);
    }

    SUBSET_PREFERENCE
        .iter()
        .find_map(|name| part.service(*name))
        .ok_or_else(|| {
            Error::ServiceNotAvailable(format!(
                "no subsettable service for part '{}' (available: {})",
                part.name,
                available_names(part)
            ))
        })
}

/// Chunks touched by `range` on an axis chunked every `chunk_len` points.
pub(crate) fn chunk_span(range: &Range<u64>, chunk_len: u64) -> u64 {
    if range.is_empty() || chunk_len == 0 {
        return 0;
    }
    (range.end - 1) / chunk_len - range.start / chunk_len + 1
}
