use anyhow::Result;
use copernicusmarine::{SubsetRequest, response_to_json, subset};

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure authentication via env vars or `copernicusmarine login`.
    let request = SubsetRequest {
        dataset_id: Some("cmems_mod_glo_phy-thetao_anfc_0.083deg_P1D-m".to_string()),
        variables: vec!["thetao".to_string()],
        minimum_longitude: Some(-9.0),
        maximum_longitude: Some(5.0),
        minimum_latitude: Some(33.0),
        maximum_latitude: Some(40.0),
        minimum_depth: Some(0.0),
        maximum_depth: Some(100.0),
        start_datetime: Some("2024-01-01".to_string()),
        end_datetime: Some("2024-01-07".to_string()),
        output_filename: Some("sea_temperature.zarr".to_string()),
        ..SubsetRequest::default()
    };

    let response = subset(request)?;
    let summary = response_to_json(&response, &["all".to_string()])?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
