//! Walks the STAC tree of the data store into a [`CopernicusMarineCatalogue`].

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::concurrency::run_concurrently;
use crate::error::Error;
use crate::models::{CopernicusMarineCatalogue, Product};
use crate::stac::{StacCatalog, StacCollection, StacItem, assemble_datasets, parse_full_dataset_id};
use crate::util::url_parent;

const ROOT_CATALOG: &str = "catalog.stac.json";
const PRODUCT_COLLECTION: &str = "product.stac.json";
const DATASET_PRODUCT_MAPPING: &str = "dataset_product_id_mapping.json";

impl Client {
    /// Fetches the catalogue, narrowed to one product and/or one dataset.
    ///
    /// With a dataset id only, the owning product is looked up in the
    /// dataset/product mapping; the whole tree is walked when the mapping
    /// does not know the dataset.
    pub fn fetch_catalogue(
        &self,
        product_id: Option<&str>,
        dataset_id: Option<&str>,
    ) -> Result<CopernicusMarineCatalogue> {
        let base = self.metadata_base_url();

        let product_id = match (product_id, dataset_id) {
            (Some(p), _) => Some(p.to_string()),
            (None, Some(d)) => self.product_of_dataset(d)?,
            (None, None) => None,
        };

        let mut products = match &product_id {
            Some(pid) => {
                let url = format!("{base}/{pid}/{PRODUCT_COLLECTION}");
                let product = self.fetch_product(pid, &url, dataset_id, self.max_concurrent_requests())?;
                match product {
                    Some(product) => vec![product],
                    None => {
                        return Err(Error::ProductNotFound(pid.clone()).into());
                    }
                }
            }
            None => self.fetch_all_products(dataset_id)?,
        };

        if let Some(dataset_id) = dataset_id {
            products.retain(|p| p.datasets.iter().any(|d| d.dataset_id == dataset_id));
            if products.is_empty() {
                return Err(Error::DatasetNotFound(match &product_id {
                    Some(pid) => format!("{dataset_id} (not in product {pid})"),
                    None => dataset_id.to_string(),
                })
                .into());
            }
        }

        let mut catalogue = CopernicusMarineCatalogue { products };
        catalogue.sort();
        Ok(catalogue)
    }

    fn product_of_dataset(&self, dataset_id: &str) -> Result<Option<String>> {
        let url = format!("{}/{DATASET_PRODUCT_MAPPING}", self.metadata_base_url());
        let mapping: Option<HashMap<String, String>> = match self.get_json_opt(&url) {
            Ok(mapping) => mapping,
            Err(e) => {
                debug!(error = %e, "dataset/product mapping unavailable");
                None
            }
        };
        let product = mapping.and_then(|m| m.get(dataset_id).cloned());
        if product.is_none() {
            info!(dataset_id, "dataset not in the product mapping, walking the whole catalogue");
        }
        Ok(product)
    }

    fn fetch_all_products(&self, dataset_id: Option<&str>) -> Result<Vec<Product>> {
        let root_url = format!("{}/{ROOT_CATALOG}", self.metadata_base_url());
        let root: StacCatalog = self.get_json(&root_url)?;
        let links = root.product_links(&root_url);
        info!(products = links.len(), "fetching catalogue");

        let pb = self.progress_bar(
            links.len() as u64,
            "{msg} [{elapsed_precise}] {bar:40} {pos}/{len} products",
        );
        if let Some(pb) = &pb {
            pb.set_message("Fetching catalogue");
        }

        let results = run_concurrently(self.max_concurrent_requests(), links, |(pid, url)| {
            let product = self.fetch_product(&pid, &url, dataset_id, 1);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            product
        })?;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let mut products = Vec::new();
        for result in results {
            match result {
                Ok(Some(product)) => products.push(product),
                Ok(None) => {}
                Err(e) => warn!(error = %format!("{e:#}"), "skipping product"),
            }
        }
        Ok(products)
    }

    /// `Ok(None)` when the product collection does not exist.
    fn fetch_product(
        &self,
        product_id: &str,
        url: &str,
        dataset_id: Option<&str>,
        workers: usize,
    ) -> Result<Option<Product>> {
        let Some(collection) = self.get_json_opt::<StacCollection>(url)? else {
            debug!(product_id, "product collection not found");
            return Ok(None);
        };

        let item_urls: Vec<String> = collection
            .item_urls(url)
            .into_iter()
            .filter(|u| dataset_id.is_none_or(|d| item_belongs_to(u, d)))
            .collect();

        let items = run_concurrently(workers, item_urls, |item_url| {
            let item: StacItem = self.get_json(&item_url)?;
            Ok(item.to_parsed(&item_url))
        })?;

        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Ok(item) => parsed.push(item),
                Err(e) => warn!(product_id, error = %format!("{e:#}"), "skipping malformed dataset item"),
            }
        }

        let mut product = collection.to_product();
        product.datasets = assemble_datasets(parsed);
        Ok(Some(product))
    }

    /// Products whose id or any string field contains one of `tokens`.
    pub fn search(&self, tokens: &[String]) -> Result<CopernicusMarineCatalogue> {
        let mut catalogue = self.fetch_catalogue(None, None)?;
        catalogue.filter_contains(tokens);
        Ok(catalogue)
    }
}

/// Item documents live in a directory named after the full dataset id.
fn item_belongs_to(item_url: &str, dataset_id: &str) -> bool {
    let dir = url_parent(item_url).rsplit('/').next().unwrap_or_default();
    let stem = item_url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(".stac.json")
        .trim_end_matches(".json");
    [dir, stem]
        .into_iter()
        .any(|name| parse_full_dataset_id(name).0 == dataset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMode;
    use crate::client::ClientConfig;
    use crate::stac::tests::ITEM_JSON;

    const PRODUCT: &str = "GLOBAL_ANALYSISFORECAST_PHY_001_024";
    const DATASET: &str = "cmems_mod_glo_phy-thetao_anfc_0.083deg_P1D-m";

    fn offline_client(dir: &std::path::Path) -> Client {
        Client::new(ClientConfig {
            cache_dir: dir.to_path_buf(),
            cache_mode: CacheMode::Enabled,
            progress: false,
            max_concurrent_requests: 2,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn seed(client: &Client) -> String {
        let base = client.metadata_base_url();
        let product_url = format!("{base}/{PRODUCT}/{PRODUCT_COLLECTION}");
        client
            .cache
            .put(
                &format!("{base}/{DATASET_PRODUCT_MAPPING}"),
                &format!(r#"{{"{DATASET}": "{PRODUCT}"}}"#),
            )
            .unwrap();
        client
            .cache
            .put(
                &format!("{base}/{ROOT_CATALOG}"),
                &format!(r#"{{"links": [{{"rel": "child", "href": "./{PRODUCT}/{PRODUCT_COLLECTION}"}}]}}"#),
            )
            .unwrap();
        client
            .cache
            .put(
                &product_url,
                &format!(
                    r#"{{"id": "{PRODUCT}", "title": "Global Ocean Physics", "links": [{{"rel": "item", "href": "{DATASET}_202406/dataset.stac.json"}}]}}"#
                ),
            )
            .unwrap();
        client
            .cache
            .put(
                &format!("{base}/{PRODUCT}/{DATASET}_202406/dataset.stac.json"),
                ITEM_JSON,
            )
            .unwrap();
        product_url
    }

    #[test]
    fn dataset_is_resolved_through_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let client = offline_client(dir.path());
        seed(&client);

        let catalogue = client.fetch_catalogue(None, Some(DATASET)).unwrap();
        assert_eq!(catalogue.products.len(), 1);
        let (product, dataset) = catalogue.find_dataset(DATASET).unwrap();
        assert_eq!(product.product_id, PRODUCT);
        assert_eq!(dataset.versions[0].label, "202406");
    }

    #[test]
    fn full_walk_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let client = offline_client(dir.path());
        seed(&client);

        let catalogue = client.fetch_catalogue(None, None).unwrap();
        assert_eq!(catalogue.products.len(), 1);

        let found = client.search(&["physics".to_string()]).unwrap();
        assert_eq!(found.products.len(), 1);
        let none = client.search(&["biogeochemistry".to_string()]).unwrap();
        assert!(none.products.is_empty());
    }

    #[test]
    fn dataset_missing_from_product() {
        let dir = tempfile::tempdir().unwrap();
        let client = offline_client(dir.path());
        seed(&client);
        let err = client
            .fetch_catalogue(Some(PRODUCT), Some("cmems_unknown"))
            .unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert_eq!(err.kind(), "DatasetNotFound");
    }

    #[test]
    fn item_url_matching() {
        assert!(item_belongs_to(
            "https://m/P/cmems_x_202211--ext--bathy/dataset.stac.json",
            "cmems_x"
        ));
        assert!(item_belongs_to("https://m/P/cmems_x_202211.stac.json", "cmems_x"));
        assert!(!item_belongs_to("https://m/P/cmems_y_202211/dataset.stac.json", "cmems_x"));
    }
}
