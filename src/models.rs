//! In-memory catalogue: products, datasets, versions, parts and services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const VERSION_DEFAULT: &str = "default";
pub const PART_DEFAULT: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CopernicusMarineCatalogue {
    pub products: Vec<Product>,
}

impl CopernicusMarineCatalogue {
    pub const FIELDS: &'static [&'static str] = &["products"];

    pub fn sort(&mut self) {
        self.products.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        for product in &mut self.products {
            product.sort();
        }
    }

    pub fn find_dataset(&self, dataset_id: &str) -> Option<(&Product, &Dataset)> {
        self.products.iter().find_map(|p| {
            p.datasets
                .iter()
                .find(|d| d.dataset_id == dataset_id)
                .map(|d| (p, d))
        })
    }

    /// Keeps the products where any token appears in any of their string fields.
    pub fn filter_contains(&mut self, tokens: &[String]) {
        if tokens.is_empty() {
            return;
        }
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        self.products.retain(|product| {
            let value = serde_json::to_value(product).unwrap_or_default();
            tokens.iter().any(|token| value_contains(&value, token))
        });
    }
}

fn value_contains(value: &serde_json::Value, token: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s.to_lowercase().contains(token),
        serde_json::Value::Array(items) => items.iter().any(|v| value_contains(v, token)),
        serde_json::Value::Object(map) => map.values().any(|v| value_contains(v, token)),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub title: String,
    pub product_id: String,
    pub thumbnail_url: String,
    pub description: String,
    pub digital_object_identifier: Option<String>,
    pub sources: Vec<String>,
    pub processing_level: Option<String>,
    pub production_center: String,
    pub keywords: Vec<String>,
    pub datasets: Vec<Dataset>,
}

impl Product {
    pub const FIELDS: &'static [&'static str] = &[
        "title",
        "product_id",
        "thumbnail_url",
        "description",
        "digital_object_identifier",
        "sources",
        "processing_level",
        "production_center",
        "keywords",
        "datasets",
    ];

    pub fn sort(&mut self) {
        self.datasets.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        for dataset in &mut self.datasets {
            dataset.sort();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub dataset_id: String,
    pub dataset_name: String,
    pub digital_object_identifier: Option<String>,
    pub versions: Vec<Version>,
}

impl Dataset {
    pub const FIELDS: &'static [&'static str] = &[
        "dataset_id",
        "dataset_name",
        "digital_object_identifier",
        "versions",
    ];

    pub fn sort(&mut self) {
        // Newest label first; the unversioned "default" label sorts after dated ones.
        self.versions.sort_by(|a, b| {
            let a_default = a.label == VERSION_DEFAULT;
            let b_default = b.label == VERSION_DEFAULT;
            a_default.cmp(&b_default).then_with(|| b.label.cmp(&a.label))
        });
        for version in &mut self.versions {
            version.sort();
        }
    }

    /// The requested version, or the newest one that is already released.
    pub fn select_version(&self, requested: Option<&str>) -> Result<&Version, Error> {
        if let Some(label) = requested {
            return self.versions.iter().find(|v| v.label == label).ok_or_else(|| {
                Error::DatasetVersionNotFound(format!(
                    "version '{}' of dataset '{}' (available: {})",
                    label,
                    self.dataset_id,
                    self.versions
                        .iter()
                        .map(|v| v.label.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            });
        }

        let now = Utc::now();
        let mut released: Vec<&Version> = self
            .versions
            .iter()
            .filter(|v| v.parts.iter().any(|p| p.is_released(now)))
            .collect();
        if released.is_empty() {
            released = self.versions.iter().collect();
        }
        released
            .into_iter()
            .max_by(|a, b| {
                let a_dated = a.label != VERSION_DEFAULT;
                let b_dated = b.label != VERSION_DEFAULT;
                a_dated.cmp(&b_dated).then_with(|| a.label.cmp(&b.label))
            })
            .ok_or_else(|| {
                Error::DatasetVersionNotFound(format!(
                    "dataset '{}' has no version",
                    self.dataset_id
                ))
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub label: String,
    pub parts: Vec<Part>,
}

impl Version {
    pub const FIELDS: &'static [&'static str] = &["label", "parts"];

    pub fn sort(&mut self) {
        self.parts.sort_by(|a, b| {
            let a_default = a.name == PART_DEFAULT;
            let b_default = b.name == PART_DEFAULT;
            b_default.cmp(&a_default).then_with(|| a.name.cmp(&b.name))
        });
    }

    pub fn select_part(&self, requested: Option<&str>) -> Result<&Part, Error> {
        match requested {
            Some(name) => self.parts.iter().find(|p| p.name == name).ok_or_else(|| {
                Error::DatasetVersionPartNotFound(format!(
                    "part '{}' of version '{}' (available: {})",
                    name,
                    self.label,
                    self.parts
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }),
            None => self
                .parts
                .iter()
                .find(|p| p.name == PART_DEFAULT)
                .or_else(|| self.parts.first())
                .ok_or_else(|| {
                    Error::DatasetVersionPartNotFound(format!(
                        "version '{}' has no part",
                        self.label
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Part {
    pub name: String,
    pub services: Vec<Service>,
    pub released_date: Option<String>,
    pub retired_date: Option<String>,
    pub arco_updated_date: Option<String>,
    pub arco_updating_start_date: Option<String>,
    pub url_metadata: String,
}

impl Part {
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "services",
        "released_date",
        "retired_date",
        "arco_updated_date",
        "arco_updating_start_date",
        "url_metadata",
    ];

    pub fn service(&self, name: ServiceName) -> Option<&Service> {
        self.services.iter().find(|s| s.service_name == name)
    }

    pub fn is_sparse(&self) -> bool {
        self.services.iter().any(|s| {
            s.service_name == ServiceName::ArcoPlatformSeries
                || s.service_format == Some(ServiceFormat::Sqlite)
        })
    }

    pub fn is_released(&self, now: DateTime<Utc>) -> bool {
        match self.released_date.as_deref().and_then(parse_catalogue_date) {
            Some(date) => date <= now,
            None => true,
        }
    }

    pub fn retired(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retired_date
            .as_deref()
            .and_then(parse_catalogue_date)
            .filter(|date| *date <= now)
    }

    pub fn updating_start(&self) -> Option<DateTime<Utc>> {
        self.arco_updating_start_date
            .as_deref()
            .and_then(parse_catalogue_date)
    }
}

pub(crate) fn parse_catalogue_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceName {
    OriginalFiles,
    ArcoGeoSeries,
    ArcoTimeSeries,
    OmiArco,
    StaticArco,
    ArcoPlatformSeries,
    Wmts,
    Opendap,
    Motu,
}

impl ServiceName {
    pub const ALL: [ServiceName; 9] = [
        ServiceName::OriginalFiles,
        ServiceName::ArcoGeoSeries,
        ServiceName::ArcoTimeSeries,
        ServiceName::OmiArco,
        ServiceName::StaticArco,
        ServiceName::ArcoPlatformSeries,
        ServiceName::Wmts,
        ServiceName::Opendap,
        ServiceName::Motu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::OriginalFiles => "original-files",
            ServiceName::ArcoGeoSeries => "arco-geo-series",
            ServiceName::ArcoTimeSeries => "arco-time-series",
            ServiceName::OmiArco => "omi-arco",
            ServiceName::StaticArco => "static-arco",
            ServiceName::ArcoPlatformSeries => "arco-platform-series",
            ServiceName::Wmts => "wmts",
            ServiceName::Opendap => "opendap",
            ServiceName::Motu => "motu",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            ServiceName::OriginalFiles => "files",
            ServiceName::ArcoGeoSeries => "geoseries",
            ServiceName::ArcoTimeSeries => "timeseries",
            ServiceName::OmiArco => "omi-arco",
            ServiceName::StaticArco => "static-arco",
            ServiceName::ArcoPlatformSeries => "platformseries",
            ServiceName::Wmts => "wmts",
            ServiceName::Opendap => "opendap",
            ServiceName::Motu => "motu",
        }
    }

    /// Key of the STAC item asset that carries this service.
    pub(crate) fn from_asset_key(key: &str) -> Option<Self> {
        match key {
            "native" => Some(ServiceName::OriginalFiles),
            "timeChunked" => Some(ServiceName::ArcoGeoSeries),
            "geoChunked" => Some(ServiceName::ArcoTimeSeries),
            "omi" => Some(ServiceName::OmiArco),
            "static" => Some(ServiceName::StaticArco),
            "platformChunked" => Some(ServiceName::ArcoPlatformSeries),
            "wmts" => Some(ServiceName::Wmts),
            "dap" | "opendap" => Some(ServiceName::Opendap),
            "motu" => Some(ServiceName::Motu),
            _ => None,
        }
    }

    pub fn is_arco(&self) -> bool {
        matches!(
            self,
            ServiceName::ArcoGeoSeries
                | ServiceName::ArcoTimeSeries
                | ServiceName::OmiArco
                | ServiceName::StaticArco
                | ServiceName::ArcoPlatformSeries
        )
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        ServiceName::ALL
            .into_iter()
            .find(|n| n.as_str() == s || n.short_name() == s)
            .ok_or_else(|| {
                Error::ServiceNotSupported(format!(
                    "unknown service '{}' (expected one of: {})",
                    s,
                    ServiceName::ALL
                        .iter()
                        .map(|n| n.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceFormat {
    Zarr,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub service_name: ServiceName,
    pub service_short_name: String,
    pub service_format: Option<ServiceFormat>,
    pub uri: String,
    pub variables: Vec<Variable>,
}

impl Service {
    pub const FIELDS: &'static [&'static str] = &[
        "service_name",
        "service_short_name",
        "service_format",
        "uri",
        "variables",
    ];

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|v| v.short_name == name)
            .or_else(|| {
                self.variables
                    .iter()
                    .find(|v| v.standard_name.as_deref() == Some(name))
            })
    }

    /// First coordinate with this id across the service variables.
    pub fn coordinate(&self, coordinate_id: &str) -> Option<&Coordinate> {
        self.variables
            .iter()
            .flat_map(|v| v.coordinates.iter())
            .find(|c| c.coordinate_id == coordinate_id)
    }

    /// All distinct coordinates, in first-seen order.
    pub fn coordinates(&self) -> Vec<&Coordinate> {
        let mut out: Vec<&Coordinate> = Vec::new();
        for c in self.variables.iter().flat_map(|v| v.coordinates.iter()) {
            if !out.iter().any(|o| o.coordinate_id == c.coordinate_id) {
                out.push(c);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub short_name: String,
    pub standard_name: Option<String>,
    pub units: Option<String>,
    pub bbox: Option<Vec<f64>>,
    pub coordinates: Vec<Coordinate>,
}

impl Variable {
    pub const FIELDS: &'static [&'static str] = &[
        "short_name",
        "standard_name",
        "units",
        "bbox",
        "coordinates",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateAxis {
    T,
    X,
    Y,
    Z,
    Other,
}

impl CoordinateAxis {
    pub(crate) fn guess(coordinate_id: &str, axis: Option<&str>) -> Self {
        match axis.map(str::to_lowercase).as_deref() {
            Some("t") => return CoordinateAxis::T,
            Some("x") => return CoordinateAxis::X,
            Some("y") => return CoordinateAxis::Y,
            Some("z") => return CoordinateAxis::Z,
            _ => {}
        }
        match coordinate_id {
            "time" => CoordinateAxis::T,
            "longitude" | "lon" | "x" => CoordinateAxis::X,
            "latitude" | "lat" | "y" => CoordinateAxis::Y,
            "depth" | "elevation" | "z" => CoordinateAxis::Z,
            _ => CoordinateAxis::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub coordinate_id: String,
    pub units: String,
    pub axis: CoordinateAxis,
    pub minimum_value: Option<f64>,
    pub maximum_value: Option<f64>,
    pub step: Option<f64>,
    pub values: Option<Vec<f64>>,
    pub chunking_length: Option<u64>,
    pub chunk_type: Option<String>,
    pub chunk_reference_coordinate: Option<f64>,
    pub chunk_geometric_factor: Option<f64>,
}

impl Coordinate {
    pub const FIELDS: &'static [&'static str] = &[
        "coordinate_id",
        "units",
        "axis",
        "minimum_value",
        "maximum_value",
        "step",
        "values",
        "chunking_length",
        "chunk_type",
        "chunk_reference_coordinate",
        "chunk_geometric_factor",
    ];
}

/// Every field name a describe query may reference.
pub(crate) fn all_field_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = [
        CopernicusMarineCatalogue::FIELDS,
        Product::FIELDS,
        Dataset::FIELDS,
        Version::FIELDS,
        Part::FIELDS,
        Service::FIELDS,
        Variable::FIELDS,
        Coordinate::FIELDS,
    ]
    .concat();
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, released: Option<&str>) -> Part {
        Part {
            name: name.to_string(),
            released_date: released.map(str::to_string),
            ..Part::default()
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            dataset_id: "cmems_mod_glo_phy_anfc_0.083deg_P1D-m".into(),
            dataset_name: "daily mean".into(),
            digital_object_identifier: None,
            versions: vec![
                Version {
                    label: "202211".into(),
                    parts: vec![part("default", Some("2022-11-01"))],
                },
                Version {
                    label: "209901".into(),
                    parts: vec![part("default", Some("2099-01-01T00:00:00Z"))],
                },
                Version {
                    label: "202106".into(),
                    parts: vec![part("bathy", None), part("default", None)],
                },
            ],
        }
    }

    #[test]
    fn latest_released_version_is_selected() {
        let ds = dataset();
        assert_eq!(ds.select_version(None).unwrap().label, "202211");
        assert_eq!(ds.select_version(Some("202106")).unwrap().label, "202106");
        let err = ds.select_version(Some("201001")).unwrap_err();
        assert_eq!(err.kind(), "DatasetVersionNotFound");
    }

    #[test]
    fn default_part_first() {
        let mut ds = dataset();
        ds.sort();
        assert_eq!(ds.versions[0].label, "209901");
        let v = ds.versions.iter().find(|v| v.label == "202106").unwrap();
        assert_eq!(v.parts[0].name, "default");
        assert_eq!(v.select_part(None).unwrap().name, "default");
        assert_eq!(v.select_part(Some("bathy")).unwrap().name, "bathy");
        assert!(v.select_part(Some("nope")).is_err());
    }

    #[test]
    fn service_names_parse_long_and_short() {
        assert_eq!(
            "timeseries".parse::<ServiceName>().unwrap(),
            ServiceName::ArcoTimeSeries
        );
        assert_eq!(
            "arco-geo-series".parse::<ServiceName>().unwrap(),
            ServiceName::ArcoGeoSeries
        );
        assert_eq!("files".parse::<ServiceName>().unwrap(), ServiceName::OriginalFiles);
        assert!("ftp".parse::<ServiceName>().is_err());
    }

    #[test]
    fn contains_filter_is_case_insensitive() {
        let mut catalogue = CopernicusMarineCatalogue {
            products: vec![
                Product {
                    product_id: "GLOBAL_ANALYSISFORECAST_PHY_001_024".into(),
                    title: "Global Ocean Physics".into(),
                    ..Product::default()
                },
                Product {
                    product_id: "BALTICSEA_ANALYSISFORECAST_BGC_003_007".into(),
                    title: "Baltic Sea Biogeochemistry".into(),
                    datasets: vec![dataset()],
                    ..Product::default()
                },
            ],
        };
        catalogue.filter_contains(&["P1D-M".to_string()]);
        assert_eq!(catalogue.products.len(), 1);
        assert!(catalogue.products[0].product_id.starts_with("BALTIC"));
    }

    #[test]
    fn axis_guess() {
        assert_eq!(CoordinateAxis::guess("time", None), CoordinateAxis::T);
        assert_eq!(CoordinateAxis::guess("foo", Some("Z")), CoordinateAxis::Z);
        assert_eq!(CoordinateAxis::guess("platform", None), CoordinateAxis::Other);
    }
}
