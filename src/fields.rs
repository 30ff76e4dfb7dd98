//! Field projection of JSON responses (`returned_fields`, `returned_fields_exclude`).

use serde_json::{Map, Value};

use crate::error::Error;
use crate::models::all_field_names;

/// Field names a projection may use on top of the catalogue models.
const RESPONSE_FIELDS: &[&str] = &[
    "files",
    "files_deleted",
    "files_not_found",
    "number_of_files_to_download",
    "total_size",
    "status",
    "message",
    "s3_url",
    "https_url",
    "file_size",
    "last_modified_datetime",
    "etag",
    "file_format",
    "output_directory",
    "filename",
    "file_path",
    "file_status",
    "data_transfer_size",
    "variables",
    "coordinates_extent",
    "coordinate_id",
    "minimum",
    "maximum",
    "unit",
];

pub(crate) fn validate_fields(fields: &[String], describe_only: bool) -> Result<(), Error> {
    let known = all_field_names();
    let unknown: Vec<&str> = fields
        .iter()
        .map(String::as_str)
        .filter(|f| !known.contains(f) && (describe_only || !RESPONSE_FIELDS.contains(f)))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::WrongFieldsError(format!(
            "unknown field(s): {}",
            unknown.join(", ")
        )))
    }
}

/// Applies both projections; an empty list means "no projection".
pub(crate) fn project(value: Value, include: &[String], exclude: &[String]) -> Value {
    let value = if include.is_empty() {
        value
    } else {
        keep_fields(&value, include).unwrap_or_else(|| Value::Object(Map::new()))
    };
    if exclude.is_empty() {
        value
    } else {
        exclude_fields(value, exclude)
    }
}

/// Keeps the listed fields and the containers leading to them.
fn keep_fields(value: &Value, fields: &[String]) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if fields.iter().any(|f| f == k) {
                    out.insert(k.clone(), v.clone());
                } else if let Some(kept) = keep_fields(v, fields) {
                    out.insert(k.clone(), kept);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        Value::Array(items) => {
            let out: Vec<Value> = items.iter().filter_map(|v| keep_fields(v, fields)).collect();
            (!out.is_empty()).then_some(Value::Array(out))
        }
        _ => None,
    }
}

fn exclude_fields(value: Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !fields.iter().any(|f| f == k))
                .map(|(k, v)| (k, exclude_fields(v, fields)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| exclude_fields(v, fields))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalogue() -> Value {
        json!({
            "products": [{
                "product_id": "P",
                "title": "T",
                "datasets": [{
                    "dataset_id": "D",
                    "versions": [{"label": "202211", "parts": []}]
                }]
            }]
        })
    }

    #[test]
    fn keeps_containers_to_listed_fields() {
        let out = project(catalogue(), &["dataset_id".into(), "product_id".into()], &[]);
        assert_eq!(
            out,
            json!({"products": [{"product_id": "P", "datasets": [{"dataset_id": "D"}]}]})
        );
    }

    #[test]
    fn excludes_anywhere() {
        let out = project(catalogue(), &[], &["versions".into(), "title".into()]);
        assert_eq!(
            out,
            json!({"products": [{"product_id": "P", "datasets": [{"dataset_id": "D"}]}]})
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(validate_fields(&["dataset_id".into()], true).is_ok());
        assert!(validate_fields(&["file_status".into()], true).is_err());
        assert!(validate_fields(&["file_status".into()], false).is_ok());
        let err = validate_fields(&["datasetid".into()], false).unwrap_err();
        assert_eq!(err.kind(), "WrongFieldsError");
    }
}
