//! STAC documents of the marine data store and their conversion into
//! catalogue models.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::models::{
    Coordinate, CoordinateAxis, Dataset, PART_DEFAULT, Part, Product, Service, ServiceFormat,
    ServiceName, VERSION_DEFAULT, Variable, Version,
};
use crate::util::{url_parent, urljoin};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StacLink {
    #[serde(default)]
    pub(crate) rel: Option<String>,
    pub(crate) href: String,
}

fn links_with_rel<'a>(links: &'a [StacLink], rel: &'a str) -> impl Iterator<Item = &'a StacLink> {
    links.iter().filter(move |l| l.rel.as_deref() == Some(rel))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StacCatalog {
    #[serde(default)]
    links: Vec<StacLink>,
}

impl StacCatalog {
    /// (product id, absolute collection url) for every child of the root catalogue.
    pub(crate) fn product_links(&self, catalog_url: &str) -> Vec<(String, String)> {
        let base = url_parent(catalog_url);
        links_with_rel(&self.links, "child")
            .map(|l| (product_id_from_href(&l.href), urljoin(base, &l.href)))
            .collect()
    }
}

fn product_id_from_href(href: &str) -> String {
    href.trim_start_matches("./")
        .split('/')
        .next()
        .unwrap_or(href)
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct StacProvider {
    name: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StacAsset {
    href: String,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
    #[serde(default, rename = "viewDims")]
    view_dims: BTreeMap<String, StacViewDim>,
    #[serde(default, rename = "viewVariables")]
    view_variables: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StacCollection {
    pub(crate) id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    providers: Vec<StacProvider>,
    #[serde(default, rename = "sci:doi")]
    doi: Option<String>,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    links: Vec<StacLink>,
}

impl StacCollection {
    pub(crate) fn item_urls(&self, collection_url: &str) -> Vec<String> {
        let base = url_parent(collection_url);
        links_with_rel(&self.links, "item")
            .map(|l| urljoin(base, &l.href))
            .collect()
    }

    /// Builds the product; datasets are attached separately from the items.
    pub(crate) fn to_product(&self) -> Product {
        let production_center = self
            .providers
            .iter()
            .find(|p| p.roles.iter().any(|r| r == "producer"))
            .or_else(|| self.providers.first())
            .map(|p| p.name.clone())
            .unwrap_or_default();

        Product {
            title: self.title.clone().unwrap_or_else(|| self.id.clone()),
            product_id: self.id.clone(),
            thumbnail_url: self
                .assets
                .get("thumbnail")
                .map(|a| a.href.clone())
                .unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            digital_object_identifier: self.doi.clone(),
            sources: string_list(self.properties.get("sources")),
            processing_level: self
                .properties
                .get("processingLevel")
                .and_then(Value::as_str)
                .map(str::to_string),
            production_center,
            keywords: self.keywords.clone(),
            datasets: Vec::new(),
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StacViewDim {
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    axis: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    step: Option<f64>,
    #[serde(default)]
    values: Option<Vec<Value>>,
    // Either a single length or one length per variable.
    #[serde(default, rename = "chunkLen")]
    chunk_len: Option<Value>,
    #[serde(default, rename = "chunkType")]
    chunk_type: Option<String>,
    #[serde(default, rename = "chunkRefCoord")]
    chunk_ref_coord: Option<f64>,
    #[serde(default, rename = "chunkGeometricFactor")]
    chunk_geometric_factor: Option<Value>,
}

impl StacViewDim {
    fn chunk_len_for(&self, variable: &str) -> Option<u64> {
        match &self.chunk_len {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::Object(map)) => map.get(variable).and_then(Value::as_u64),
            _ => None,
        }
    }

    fn geometric_factor_for(&self, variable: &str) -> Option<f64> {
        match &self.chunk_geometric_factor {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::Object(map)) => map.get(variable).and_then(Value::as_f64),
            _ => None,
        }
    }

    fn to_coordinate(&self, coordinate_id: &str, variable: &str) -> Coordinate {
        Coordinate {
            coordinate_id: coordinate_id.to_string(),
            units: self.units.clone().unwrap_or_default(),
            axis: CoordinateAxis::guess(coordinate_id, self.axis.as_deref()),
            minimum_value: self.min,
            maximum_value: self.max,
            step: self.step,
            values: self
                .values
                .as_ref()
                .map(|vals| vals.iter().filter_map(Value::as_f64).collect()),
            chunking_length: self.chunk_len_for(variable),
            chunk_type: self.chunk_type.clone(),
            chunk_reference_coordinate: self.chunk_ref_coord,
            chunk_geometric_factor: self.geometric_factor_for(variable),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StacItem {
    pub(crate) id: String,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
}

/// Splits `<dataset_id>[_<YYYYMM>][--ext--<part>]`.
pub(crate) fn parse_full_dataset_id(full_id: &str) -> (String, String, String) {
    let (name, part) = match full_id.split_once("--ext--") {
        Some((name, part)) => (name, part.to_string()),
        None => (full_id, PART_DEFAULT.to_string()),
    };
    if let Some((dataset_id, suffix)) = name.rsplit_once('_') {
        if suffix.len() == 6 && suffix.chars().all(|c| c.is_ascii_digit()) {
            return (dataset_id.to_string(), suffix.to_string(), part);
        }
    }
    (name.to_string(), VERSION_DEFAULT.to_string(), part)
}

/// One item of a product: a single part of a single dataset version.
#[derive(Debug, Clone)]
pub(crate) struct ParsedItem {
    pub(crate) dataset_id: String,
    pub(crate) dataset_name: String,
    pub(crate) doi: Option<String>,
    pub(crate) version: String,
    pub(crate) part: Part,
}

impl StacItem {
    pub(crate) fn to_parsed(&self, item_url: &str) -> ParsedItem {
        let (dataset_id, version, part_name) = parse_full_dataset_id(&self.id);
        let prop_str = |key: &str| {
            self.properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let cube_variables = self
            .properties
            .get("cube:variables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut services = Vec::new();
        for (key, asset) in &self.assets {
            let Some(service_name) = ServiceName::from_asset_key(key) else {
                continue;
            };
            services.push(Service {
                service_name,
                service_short_name: service_name.short_name().to_string(),
                service_format: asset.media_type.as_deref().and_then(media_type_format),
                uri: asset.href.clone(),
                variables: service_variables(asset, &cube_variables),
            });
        }
        services.sort_by_key(|s| {
            ServiceName::ALL
                .iter()
                .position(|n| *n == s.service_name)
                .unwrap_or(usize::MAX)
        });

        ParsedItem {
            dataset_name: prop_str("title").unwrap_or_else(|| dataset_id.clone()),
            doi: prop_str("sci:doi"),
            dataset_id,
            version,
            part: Part {
                name: part_name,
                services,
                released_date: prop_str("admp_released_date"),
                retired_date: prop_str("admp_retired_date"),
                arco_updated_date: prop_str("admp_updated"),
                arco_updating_start_date: prop_str("admp_updating_start_date"),
                url_metadata: item_url.to_string(),
            },
        }
    }
}

fn media_type_format(media_type: &str) -> Option<ServiceFormat> {
    if media_type.contains("zarr") {
        Some(ServiceFormat::Zarr)
    } else if media_type.contains("sqlite") {
        Some(ServiceFormat::Sqlite)
    } else {
        None
    }
}

fn service_variables(asset: &StacAsset, cube_variables: &Map<String, Value>) -> Vec<Variable> {
    // Original files carry no view: describe them with the item-level variables.
    let names: Vec<&String> = if asset.view_variables.is_empty() {
        cube_variables
            .iter()
            .filter(|(_, v)| v.get("type").and_then(Value::as_str) != Some("auxiliary"))
            .map(|(k, _)| k)
            .collect()
    } else {
        asset.view_variables.keys().collect()
    };

    names
        .into_iter()
        .map(|name| {
            let cube = cube_variables.get(name);
            let dims: Vec<String> = asset
                .view_variables
                .get(name)
                .and_then(|v| v.get("dimensions"))
                .or_else(|| cube.and_then(|c| c.get("dimensions")))
                .map(|d| string_list(Some(d)))
                .unwrap_or_default();
            let coordinates = dims
                .iter()
                .filter_map(|dim| asset.view_dims.get(dim).map(|vd| vd.to_coordinate(dim, name)))
                .collect();
            Variable {
                short_name: name.clone(),
                standard_name: cube
                    .and_then(|c| c.get("standardName"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                units: cube
                    .and_then(|c| c.get("units"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                bbox: cube
                    .and_then(|c| c.get("bbox"))
                    .and_then(Value::as_array)
                    .map(|b| b.iter().filter_map(Value::as_f64).collect()),
                coordinates,
            }
        })
        .collect()
}

/// Groups item parts into datasets and versions, in item order.
pub(crate) fn assemble_datasets(items: Vec<ParsedItem>) -> Vec<Dataset> {
    let mut datasets: Vec<Dataset> = Vec::new();
    for item in items {
        let idx = match datasets.iter().position(|d| d.dataset_id == item.dataset_id) {
            Some(idx) => idx,
            None => {
                datasets.push(Dataset {
                    dataset_id: item.dataset_id.clone(),
                    dataset_name: item.dataset_name.clone(),
                    digital_object_identifier: item.doi.clone(),
                    versions: Vec::new(),
                });
                datasets.len() - 1
            }
        };
        let dataset = &mut datasets[idx];
        match dataset.versions.iter_mut().find(|v| v.label == item.version) {
            Some(version) => {
                if version.parts.iter().any(|p| p.name == item.part.name) {
                    warn!(
                        dataset_id = %item.dataset_id,
                        version = %item.version,
                        part = %item.part.name,
                        "duplicate part in catalogue, keeping the first"
                    );
                } else {
                    version.parts.push(item.part);
                }
            }
            None => dataset.versions.push(Version {
                label: item.version,
                parts: vec![item.part],
            }),
        }
    }
    datasets
}
