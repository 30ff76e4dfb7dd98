//! ARCO Zarr services: a zarrs store over HTTPS and the copy of a subset
//! into a local Zarr (v2) group.

use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use reqwest::header::CONTENT_LENGTH;
use serde_json::{Map, Value, json};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use zarrs::array::{Array, ArrayBytes, ArraySubset};
use zarrs::filesystem::FilesystemStore;
use zarrs::storage::byte_range::{ByteRangeIterator, InvalidByteRangeError};
use zarrs::storage::{
    MaybeBytes, MaybeBytesIterator, ReadableStorageTraits, StorageError, StoreKey,
};

use crate::client::Client;
use crate::concurrency::try_run_concurrently;
use crate::selection::AxisSelection;
use crate::services::chunk_span;
use crate::util::urljoin;

const ARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";

/// Read-only store answering zarrs key lookups with GETs below `base_url`.
#[derive(Debug, Clone)]
pub(crate) struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub(crate) fn new(client: &Client, base_url: &str) -> Self {
        Self {
            client: client.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, key: &StoreKey) -> String {
        urljoin(&self.base_url, key.as_str())
    }

    fn fetch(&self, key: &StoreKey) -> Result<MaybeBytes> {
        let url = self.url(key);
        debug!(url = %url, "GET");
        let resp = self
            .client
            .robust_request(|| self.client.apply_user(self.client.http.get(&url)).send())?;
        let status = resp.status();
        // S3 answers 403 for absent keys
        if status.as_u16() == 404 || status.as_u16() == 403 {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("request failed: HTTP {} for url ({})", status, url);
        }
        let bytes = resp
            .bytes()
            .with_context(|| format!("failed to read response body (url={url})"))?;
        Ok(Some(bytes))
    }
}

fn storage_error(err: anyhow::Error) -> StorageError {
    StorageError::Other(format!("{err:#}"))
}

impl ReadableStorageTraits for HttpStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        self.fetch(key).map_err(storage_error)
    }

    fn get_partial_many<'a>(
        &'a self,
        key: &StoreKey,
        byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        let Some(data) = self.fetch(key).map_err(storage_error)? else {
            return Ok(None);
        };
        let len = data.len() as u64;
        Ok(Some(Box::new(byte_ranges.map(move |byte_range| {
            let (start, end) = (byte_range.start(len), byte_range.end(len));
            if end > len || start > end {
                Err(InvalidByteRangeError::new(byte_range, len).into())
            } else {
                Ok(data.slice(start as usize..end as usize))
            }
        }))))
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let url = self.url(key);
        let resp = self
            .client
            .robust_request(|| self.client.apply_user(self.client.http.head(&url)).send())
            .map_err(storage_error)?;
        let status = resp.status();
        if status.as_u16() == 404 || status.as_u16() == 403 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StorageError::Other(format!(
                "request failed: HTTP {status} for url ({url})"
            )));
        }
        Ok(resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }

    fn supports_get_partial(&self) -> bool {
        false
    }
}

pub(crate) fn read_json<S>(store: &S, key: &str) -> Result<Option<Value>>
where
    S: ReadableStorageTraits + ?Sized,
{
    let store_key = StoreKey::new(key.to_string())?;
    match store.get(&store_key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("failed to parse Zarr metadata '{key}'")),
        None => Ok(None),
    }
}

/// Byte width of a Zarr v2 `dtype` such as `<f4` or `<M8[ns]`.
pub(crate) fn dtype_itemsize(dtype: &str) -> Option<u64> {
    let body = dtype.trim_start_matches(['<', '>', '|', '=']);
    let digits: String = body
        .chars()
        .skip(1)
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn u64_list(zarray: &Value, field: &str) -> Result<Vec<u64>> {
    zarray
        .get(field)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_u64).collect())
        .with_context(|| format!("Zarr array metadata has no '{field}'"))
}

/// Metadata of one remote array.
#[derive(Debug, Clone)]
pub(crate) struct RemoteArray {
    pub(crate) name: String,
    zarray: Value,
    attributes: Map<String, Value>,
    pub(crate) shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: String,
    pub(crate) dimensions: Vec<String>,
}

impl RemoteArray {
    pub(crate) fn read<S>(store: &S, name: &str) -> Result<Option<Self>>
    where
        S: ReadableStorageTraits + ?Sized,
    {
        let Some(zarray) = read_json(store, &format!("{name}/.zarray"))? else {
            return Ok(None);
        };
        let attributes = match read_json(store, &format!("{name}/.zattrs"))? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let shape = u64_list(&zarray, "shape")?;
        let chunks = u64_list(&zarray, "chunks")?;
        let dtype = zarray
            .get("dtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut dimensions: Vec<String> = attributes
            .get(ARRAY_DIMENSIONS)
            .and_then(Value::as_array)
            .map(|d| d.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        if dimensions.len() != shape.len() {
            if shape.len() != 1 {
                bail!("array '{name}' does not name its dimensions");
            }
            dimensions = vec![name.to_string()];
        }
        Ok(Some(Self {
            name: name.to_string(),
            zarray,
            attributes,
            shape,
            chunks,
            dtype,
            dimensions,
        }))
    }

    fn itemsize(&self) -> u64 {
        dtype_itemsize(&self.dtype).unwrap_or(8)
    }

    fn ranges(&self, axes: &[AxisSelection]) -> Vec<Range<u64>> {
        self.dimensions
            .iter()
            .zip(&self.shape)
            .map(|(dim, len)| {
                match axes
                    .iter()
                    .find(|a| &a.coordinate_id == dim)
                    .and_then(|a| a.selection.as_ref())
                {
                    Some(s) => s.range.start.min(*len)..s.range.end.min(*len),
                    None => 0..*len,
                }
            })
            .collect()
    }
}

/// A remote array and the part of it written to the output.
#[derive(Debug, Clone)]
pub(crate) struct PlannedArray {
    remote: RemoteArray,
    ranges: Vec<Range<u64>>,
    pub(crate) output_name: String,
    dimensions: Vec<String>,
    /// Depth coordinate written as elevation.
    negate: bool,
}

impl PlannedArray {
    fn output_shape(&self) -> Vec<u64> {
        self.ranges.iter().map(|r| r.end - r.start).collect()
    }

    pub(crate) fn output_bytes(&self) -> u64 {
        self.output_shape().iter().product::<u64>() * self.remote.itemsize()
    }

    /// Uncompressed bytes of every remote chunk the selection touches.
    pub(crate) fn transfer_bytes(&self) -> u64 {
        let chunks: u64 = self
            .ranges
            .iter()
            .zip(&self.remote.chunks)
            .map(|(r, c)| chunk_span(r, *c))
            .product();
        chunks * self.remote.chunks.iter().product::<u64>() * self.remote.itemsize()
    }

    /// Pieces of the first dimension aligned on remote chunk boundaries.
    fn slabs(&self) -> Vec<Range<u64>> {
        let Some(first) = self.ranges.first() else {
            return vec![0..0];
        };
        let step = self.remote.chunks.first().copied().unwrap_or(1).max(1);
        let mut out = Vec::new();
        let mut start = first.start;
        while start < first.end {
            let end = ((start / step + 1) * step).min(first.end);
            out.push(start..end);
            start = end;
        }
        out
    }
}

/// Arrays written for `variables`: the variables, then their dimension coordinates.
pub(crate) fn plan_arrays<S>(
    store: &S,
    variables: &[String],
    axes: &[AxisSelection],
    elevation: bool,
) -> Result<Vec<PlannedArray>>
where
    S: ReadableStorageTraits + ?Sized,
{
    let rename = |dim: &str| {
        if elevation && dim == "depth" {
            "elevation".to_string()
        } else {
            dim.to_string()
        }
    };

    let mut planned = Vec::new();
    let mut dimensions: Vec<String> = Vec::new();
    for name in variables {
        let remote = RemoteArray::read(store, name)?
            .with_context(|| format!("variable '{name}' is missing from the Zarr store"))?;
        for dim in &remote.dimensions {
            if !dimensions.contains(dim) {
                dimensions.push(dim.clone());
            }
        }
        planned.push(PlannedArray {
            ranges: remote.ranges(axes),
            output_name: name.clone(),
            dimensions: remote.dimensions.iter().map(|d| rename(d)).collect(),
            negate: false,
            remote,
        });
    }
    for dim in dimensions {
        let Some(remote) = RemoteArray::read(store, &dim)? else {
            debug!(dimension = %dim, "no coordinate array");
            continue;
        };
        planned.push(PlannedArray {
            ranges: remote.ranges(axes),
            output_name: rename(&dim),
            dimensions: remote.dimensions.iter().map(|d| rename(d)).collect(),
            negate: elevation && dim == "depth",
            remote,
        });
    }
    Ok(planned)
}

/// Local Zarr v2 group receiving the subset.
pub(crate) struct ZarrGroupWriter {
    root: PathBuf,
    store: Arc<FilesystemStore>,
}

impl ZarrGroupWriter {
    pub(crate) fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create directory {}", root.display()))?;
        let store = FilesystemStore::new(root)
            .with_context(|| format!("failed to open Zarr store {}", root.display()))?;
        let writer = Self {
            root: root.to_path_buf(),
            store: Arc::new(store),
        };
        writer.write_json(".zgroup", &json!({ "zarr_format": 2 }))?;
        Ok(writer)
    }

    fn write_json(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(value)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Writes the metadata of `planned` and copies its data from `source`.
    ///
    /// Returns the metadata entries for the consolidated `.zmetadata`.
    pub(crate) fn copy_array<S>(
        &self,
        source: &Arc<S>,
        planned: &PlannedArray,
        progress: Option<&ProgressBar>,
    ) -> Result<Vec<(String, Value)>>
    where
        S: ReadableStorageTraits + Send + Sync + ?Sized + 'static,
    {
        let shape = planned.output_shape();
        let chunks: Vec<u64> = planned
            .remote
            .chunks
            .iter()
            .zip(&shape)
            .map(|(c, len)| (*c).min((*len).max(1)))
            .collect();
        let mut zarray = planned.remote.zarray.clone();
        if let Some(obj) = zarray.as_object_mut() {
            obj.insert("shape".into(), json!(shape));
            obj.insert("chunks".into(), json!(chunks));
        }
        let mut attributes = planned.remote.attributes.clone();
        attributes.insert(ARRAY_DIMENSIONS.into(), json!(planned.dimensions));
        if planned.negate {
            attributes.insert("standard_name".into(), json!("elevation"));
            attributes.insert("long_name".into(), json!("Elevation"));
            attributes.insert("positive".into(), json!("up"));
            attributes.remove("valid_min");
            attributes.remove("valid_max");
        }
        let zattrs = Value::Object(attributes);
        let zarray_key = format!("{}/.zarray", planned.output_name);
        let zattrs_key = format!("{}/.zattrs", planned.output_name);
        self.write_json(&zarray_key, &zarray)?;
        self.write_json(&zattrs_key, &zattrs)?;

        let remote_path = format!("/{}", planned.remote.name);
        let local_path = format!("/{}", planned.output_name);
        let source_array = Array::open(source.clone(), &remote_path)
            .with_context(|| format!("failed to open remote array '{}'", planned.remote.name))?;
        let target = Array::open(self.store.clone(), &local_path)
            .with_context(|| format!("failed to create array '{}'", planned.output_name))?;

        let entries = vec![(zarray_key, zarray), (zattrs_key, zattrs)];
        if shape.contains(&0) {
            return Ok(entries);
        }

        let offset = planned.ranges.first().map_or(0, |r| r.start);
        for slab in planned.slabs() {
            let mut source_ranges = planned.ranges.clone();
            let mut target_ranges: Vec<Range<u64>> = shape.iter().map(|len| 0..*len).collect();
            if !source_ranges.is_empty() {
                target_ranges[0] = (slab.start - offset)..(slab.end - offset);
                source_ranges[0] = slab;
            }
            let from = ArraySubset::new_with_ranges(&source_ranges);
            let to = ArraySubset::new_with_ranges(&target_ranges);
            if planned.negate {
                copy_negated(&source_array, &target, &planned.remote.dtype, &from, &to)?;
            } else {
                let bytes: ArrayBytes<'static> = source_array
                    .retrieve_array_subset(&from)
                    .with_context(|| format!("failed to read '{}'", planned.remote.name))?;
                target
                    .store_array_subset(&to, bytes)
                    .with_context(|| format!("failed to write '{}'", planned.output_name))?;
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        Ok(entries)
    }

    /// Writes the group attributes and the consolidated metadata.
    pub(crate) fn finish(
        &self,
        attributes: Option<Value>,
        entries: Vec<(String, Value)>,
    ) -> Result<()> {
        let mut metadata = Map::new();
        metadata.insert(".zgroup".into(), json!({ "zarr_format": 2 }));
        if let Some(attributes) = attributes {
            self.write_json(".zattrs", &attributes)?;
            metadata.insert(".zattrs".into(), attributes);
        }
        metadata.extend(entries);
        self.write_json(
            ".zmetadata",
            &json!({ "metadata": metadata, "zarr_consolidated_format": 1 }),
        )
    }
}

fn copy_negated<S>(
    source: &Array<S>,
    target: &Array<FilesystemStore>,
    dtype: &str,
    from: &ArraySubset,
    to: &ArraySubset,
) -> Result<()>
where
    S: ReadableStorageTraits + ?Sized + 'static,
{
    match dtype.trim_start_matches(['<', '>', '|', '=']) {
        "f8" => {
            let values: Vec<f64> = source.retrieve_array_subset(from)?;
            let values: Vec<f64> = values.into_iter().map(|v| -v).collect();
            target.store_array_subset(to, &values)?;
        }
        "f4" => {
            let values: Vec<f32> = source.retrieve_array_subset(from)?;
            let values: Vec<f32> = values.into_iter().map(|v| -v).collect();
            target.store_array_subset(to, &values)?;
        }
        other => bail!("cannot convert a depth coordinate of type '{other}' to elevation"),
    }
    Ok(())
}

/// Copies `planned` from `source` into a new Zarr group at `destination`.
pub(crate) fn write_zarr<S>(
    source: Arc<S>,
    planned: &[PlannedArray],
    destination: &Path,
    workers: usize,
    progress: Option<ProgressBar>,
) -> Result<()>
where
    S: ReadableStorageTraits + Send + Sync + ?Sized + 'static,
{
    let writer = ZarrGroupWriter::create(destination)?;
    let attributes = read_json(source.as_ref(), ".zattrs")?;
    if let Some(pb) = &progress {
        pb.set_length(planned.iter().map(|p| p.slabs().len() as u64).sum());
    }
    info!(
        arrays = planned.len(),
        destination = %destination.display(),
        "writing Zarr subset"
    );
    let entries = try_run_concurrently(workers, planned.iter().collect(), |p: &PlannedArray| {
        writer.copy_array(&source, p, progress.as_ref())
    })?;
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    writer.finish(attributes, entries.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CoordinateAxis;
    use crate::selection::IndexSelection;
    use pretty_assertions::assert_eq;

    fn write_source(dir: &Path) -> Arc<FilesystemStore> {
        let meta = |shape: Vec<u64>, chunks: Vec<u64>, dtype: &str| {
            json!({
                "zarr_format": 2,
                "shape": shape,
                "chunks": chunks,
                "dtype": dtype,
                "compressor": null,
                "fill_value": 0.0,
                "order": "C",
                "filters": null
            })
        };
        let put = |key: &str, value: Value| {
            let path = dir.join(key);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
        };
        put(".zgroup", json!({"zarr_format": 2}));
        put(".zattrs", json!({"title": "test"}));
        put("thetao/.zarray", meta(vec![4, 3], vec![2, 2], "<f4"));
        put(
            "thetao/.zattrs",
            json!({"_ARRAY_DIMENSIONS": ["depth", "latitude"], "units": "degrees_C"}),
        );
        put("depth/.zarray", meta(vec![4], vec![2], "<f8"));
        put("depth/.zattrs", json!({"_ARRAY_DIMENSIONS": ["depth"], "positive": "down"}));
        put("latitude/.zarray", meta(vec![3], vec![2], "<f8"));

        let store = Arc::new(FilesystemStore::new(dir).unwrap());
        let thetao = Array::open(store.clone(), "/thetao").unwrap();
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        thetao
            .store_array_subset(&ArraySubset::new_with_shape(vec![4, 3]), &values)
            .unwrap();
        let depth = Array::open(store.clone(), "/depth").unwrap();
        depth
            .store_array_subset(&ArraySubset::new_with_shape(vec![4]), &vec![1.0f64, 2.0, 3.0, 4.0])
            .unwrap();
        let latitude = Array::open(store.clone(), "/latitude").unwrap();
        latitude
            .store_array_subset(&ArraySubset::new_with_shape(vec![3]), &vec![10.0f64, 11.0, 12.0])
            .unwrap();
        store
    }

    fn depth_axis() -> Vec<AxisSelection> {
        vec![AxisSelection {
            coordinate_id: "depth".into(),
            axis: CoordinateAxis::Z,
            units: "m".into(),
            selection: Some(IndexSelection {
                range: 1..3,
                minimum: 2.0,
                maximum: 3.0,
            }),
        }]
    }

    #[test]
    fn itemsize_from_dtype() {
        assert_eq!(dtype_itemsize("<f4"), Some(4));
        assert_eq!(dtype_itemsize("|u1"), Some(1));
        assert_eq!(dtype_itemsize("<M8[ns]"), Some(8));
        assert_eq!(dtype_itemsize("object"), None);
    }

    #[test]
    fn plan_and_estimates() {
        let src = tempfile::tempdir().unwrap();
        let store = write_source(src.path());
        let planned = plan_arrays(store.as_ref(), &["thetao".into()], &depth_axis(), false).unwrap();
        let names: Vec<&str> = planned.iter().map(|p| p.output_name.as_str()).collect();
        assert_eq!(names, vec!["thetao", "depth", "latitude"]);

        let thetao = &planned[0];
        assert_eq!(thetao.ranges, vec![1..3, 0..3]);
        assert_eq!(thetao.output_bytes(), 2 * 3 * 4);
        // rows 1..3 touch both depth chunks, columns touch both latitude chunks
        assert_eq!(thetao.transfer_bytes(), 4 * 4 * 4);
        assert_eq!(thetao.slabs(), vec![1..2, 2..3]);
    }

    #[test]
    fn copies_subset_as_elevation() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = write_source(src.path());
        let planned = plan_arrays(store.as_ref(), &["thetao".into()], &depth_axis(), true).unwrap();
        let destination = out.path().join("subset.zarr");
        write_zarr(store, &planned, &destination, 2, None).unwrap();

        let local = Arc::new(FilesystemStore::new(&destination).unwrap());
        let thetao = Array::open(local.clone(), "/thetao").unwrap();
        assert_eq!(thetao.shape(), &[2, 3]);
        let values: Vec<f32> = thetao
            .retrieve_array_subset(&ArraySubset::new_with_shape(vec![2, 3]))
            .unwrap();
        assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        let elevation = Array::open(local.clone(), "/elevation").unwrap();
        let values: Vec<f64> = elevation
            .retrieve_array_subset(&ArraySubset::new_with_shape(vec![2]))
            .unwrap();
        assert_eq!(values, vec![-2.0, -3.0]);

        let zmetadata: Value =
            serde_json::from_slice(&fs::read(destination.join(".zmetadata")).unwrap()).unwrap();
        assert_eq!(
            zmetadata["metadata"]["thetao/.zattrs"]["_ARRAY_DIMENSIONS"],
            json!(["elevation", "latitude"])
        );
        assert_eq!(zmetadata["metadata"]["elevation/.zattrs"]["positive"], json!("up"));
        assert_eq!(zmetadata["metadata"][".zattrs"]["title"], json!("test"));
        assert_eq!(zmetadata["zarr_consolidated_format"], json!(1));
    }
}
