use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use crate::fields::{project, validate_fields};
use crate::models::{CopernicusMarineCatalogue, Product};
use crate::request::DescribeRequest;

/// Which parts of the catalogue a describe output carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DescribeContent {
    pub(crate) description: bool,
    pub(crate) keywords: bool,
    pub(crate) datasets: bool,
    pub(crate) versions: bool,
}

impl DescribeContent {
    pub(crate) fn from_request(request: &DescribeRequest) -> Self {
        let all = request.include_all;
        Self {
            description: all || request.include_description,
            keywords: all || request.include_keywords,
            datasets: all || request.include_datasets || request.dataset_id.is_some(),
            versions: all || request.include_versions,
        }
    }
}

pub(crate) fn check_fields(request: &DescribeRequest) -> Result<()> {
    validate_fields(&request.returned_fields, true)?;
    validate_fields(&request.returned_fields_exclude, true)?;
    Ok(())
}

/// Shapes the fetched catalogue into the describe JSON document.
pub(crate) fn describe_catalogue(
    mut catalogue: CopernicusMarineCatalogue,
    request: &DescribeRequest,
) -> Result<Value> {
    catalogue.filter_contains(&request.contains);
    let content = DescribeContent::from_request(request);
    for product in &mut catalogue.products {
        trim_product(product, content, request.dataset_id.as_deref());
    }

    let mut value = serde_json::to_value(&catalogue)?;
    if let Some(products) = value.get_mut("products").and_then(Value::as_array_mut) {
        for product in products.iter_mut() {
            let Some(obj) = product.as_object_mut() else {
                continue;
            };
            if !content.description {
                obj.remove("description");
            }
            if !content.keywords {
                obj.remove("keywords");
            }
            if !content.datasets {
                obj.remove("datasets");
            }
        }
    }
    Ok(project(
        value,
        &request.returned_fields,
        &request.returned_fields_exclude,
    ))
}

fn trim_product(product: &mut Product, content: DescribeContent, dataset_id: Option<&str>) {
    if let Some(dataset_id) = dataset_id {
        product.datasets.retain(|d| d.dataset_id == dataset_id);
    }
    if content.versions {
        return;
    }
    let now = Utc::now();
    for dataset in &mut product.datasets {
        let label = dataset.select_version(None).ok().map(|v| v.label.clone());
        if let Some(label) = label {
            dataset.versions.retain(|v| v.label == label);
        }
        for version in &mut dataset.versions {
            version.parts.retain(|p| p.retired(now).is_none());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Part, Version};

    fn catalogue() -> CopernicusMarineCatalogue {
        let version = |label: &str| Version {
            label: label.into(),
            parts: vec![Part {
                name: "default".into(),
                ..Part::default()
            }],
        };
        CopernicusMarineCatalogue {
            products: vec![
                Product {
                    product_id: "GLOBAL_ANALYSISFORECAST_PHY_001_024".into(),
                    title: "Global Ocean Physics".into(),
                    description: "long text".into(),
                    keywords: vec!["ocean".into()],
                    datasets: vec![Dataset {
                        dataset_id: "cmems_mod_glo_phy_anfc_0.083deg_P1D-m".into(),
                        versions: vec![version("202406"), version("202211")],
                        ..Dataset::default()
                    }],
                    ..Product::default()
                },
                Product {
                    product_id: "ARCTIC_ANALYSISFORECAST_PHY_002_001".into(),
                    title: "Arctic Ocean Physics".into(),
                    ..Product::default()
                },
            ],
        }
    }

    #[test]
    fn default_output_lists_products_only() {
        let value = describe_catalogue(catalogue(), &DescribeRequest::default()).unwrap();
        let first = &value["products"][0];
        assert!(first.get("datasets").is_none());
        assert!(first.get("description").is_none());
        assert!(first.get("keywords").is_none());
        assert_eq!(first["title"], "Global Ocean Physics");
    }

    #[test]
    fn include_datasets_keeps_selected_version() {
        let request = DescribeRequest {
            include_datasets: true,
            contains: vec!["global".into()],
            ..DescribeRequest::default()
        };
        let value = describe_catalogue(catalogue(), &request).unwrap();
        let products = value["products"].as_array().unwrap();
        assert_eq!(products.len(), 1);
        let versions = products[0]["datasets"][0]["versions"].as_array().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0]["label"], "202406");

        let request = DescribeRequest {
            include_all: true,
            ..DescribeRequest::default()
        };
        let value = describe_catalogue(catalogue(), &request).unwrap();
        assert_eq!(
            value["products"][0]["datasets"][0]["versions"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(value["products"][0]["description"], "long text");
    }

    #[test]
    fn wrong_fields_are_rejected() {
        let request = DescribeRequest {
            returned_fields: vec!["not_a_field".into()],
            ..DescribeRequest::default()
        };
        assert!(check_fields(&request).is_err());
    }
}
