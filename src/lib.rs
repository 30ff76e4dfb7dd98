//! A Rust client for the Copernicus Marine Data Store.
//!
//! The crate covers the data store workflows:
//! browse the STAC metadata catalogue ([`describe`]), download the original
//! files of a dataset ([`get`]) and extract a spatial/temporal subset of an
//! ARCO Zarr dataset into a local Zarr store ([`subset`], [`subset_split_on`]).
//!
//! ## Quick start
//! - Store credentials once with [`login`] (or the `copernicusmarine login`
//!   command), or set `COPERNICUSMARINE_SERVICE_USERNAME` and
//!   `COPERNICUSMARINE_SERVICE_PASSWORD`.
//! - Build a request and call the matching function.
//!
//! ```no_run
//! use anyhow::Result;
//! use copernicusmarine::{SubsetRequest, subset};
//!
//! fn main() -> Result<()> {
//!     let response = subset(SubsetRequest {
//!         dataset_id: Some("cmems_mod_glo_phy-thetao_anfc_0.083deg_P1D-m".to_string()),
//!         variables: vec!["thetao".to_string()],
//!         minimum_longitude: Some(-9.0),
//!         maximum_longitude: Some(5.0),
//!         minimum_latitude: Some(33.0),
//!         maximum_latitude: Some(40.0),
//!         start_datetime: Some("2024-01-01".to_string()),
//!         end_datetime: Some("2024-01-31".to_string()),
//!         ..SubsetRequest::default()
//!     })?;
//!     println!("{}", response.file_path.display());
//!     Ok(())
//! }
//! ```
//!
//! For full usage and configuration details, see the crate README.

#![forbid(unsafe_code)]

mod api;
mod arco;
mod auth;
mod cache;
mod catalogue;
mod client;
mod concurrency;
mod config;
mod describe;
mod download;
mod error;
mod fields;
mod get;
mod login;
mod models;
mod request;
mod response;
mod s3;
mod selection;
mod services;
mod stac;
mod subset;
mod time;
mod util;

pub use api::{describe, get, login, subset, subset_split_on};
pub use cache::CacheMode;
pub use client::{Client, ClientConfig, RemoteFile};
pub use concurrency::{run_concurrently, try_run_concurrently};
pub use config::{Credentials, CredentialsSource, resolve_credentials};
pub use error::{Error, camel_case_to_sentence};
pub use models::{
    Coordinate, CoordinateAxis, CopernicusMarineCatalogue, Dataset, Part, Product, Service,
    ServiceFormat, ServiceName, Variable, Version,
};
pub use request::{
    CoordinatesSelectionMethod, DescribeRequest, FileFormat, GetRequest, LoginRequest, SplitOn,
    SubsetRequest, TemplateKind, VerticalAxis, create_template,
};
pub use response::{
    CoordinatesExtent, FileGet, FileStatus, ResponseGet, ResponseSubset, StatusCode,
    response_to_json,
};
pub use selection::IndexSelection;
pub use time::parse_datetime;
