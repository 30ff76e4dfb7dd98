//! Translating requested bounds into index ranges of catalogue coordinates.

use anyhow::Result;
use serde_json::Value;
use std::ops::Range;
use tracing::warn;

use crate::error::Error;
use crate::models::{Coordinate, CoordinateAxis, Variable};
use crate::request::{CoordinatesSelectionMethod, SubsetRequest, VerticalAxis};
use crate::response::CoordinatesExtent;
use crate::time::{TimeUnits, parse_datetime};

/// Coordinate values known from the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Grid {
    Explicit(Vec<f64>),
    Regular { start: f64, step: f64, len: u64 },
}

impl Grid {
    pub(crate) fn from_coordinate(c: &Coordinate) -> Option<Self> {
        if let Some(values) = c.values.as_ref().filter(|v| !v.is_empty()) {
            return Some(Grid::Explicit(values.clone()));
        }
        let (min, max) = (c.minimum_value?, c.maximum_value?);
        if min == max {
            return Some(Grid::Regular {
                start: min,
                step: 1.0,
                len: 1,
            });
        }
        let step = c.step.filter(|s| *s > 0.0)?;
        let len = ((max - min) / step).round() as u64 + 1;
        Some(Grid::Regular {
            start: min,
            step,
            len,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            Grid::Explicit(values) => values.len() as u64,
            Grid::Regular { len, .. } => *len,
        }
    }

    pub(crate) fn value(&self, i: u64) -> f64 {
        match self {
            Grid::Explicit(values) => values[i as usize],
            Grid::Regular { start, step, .. } => start + step * i as f64,
        }
    }
}

/// Index range and the grid values at its ends.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSelection {
    pub range: Range<u64>,
    pub minimum: f64,
    pub maximum: f64,
}

fn partition_point(len: u64, pred: impl Fn(u64) -> bool) -> u64 {
    let (mut lo, mut hi) = (0u64, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

impl Coordinate {
    /// Indices of this coordinate selected by `[minimum, maximum]`.
    ///
    /// `None` when the catalogue does not describe the coordinate values.
    pub fn index_range(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        method: CoordinatesSelectionMethod,
    ) -> Result<Option<IndexSelection>, Error> {
        let Some(grid) = Grid::from_coordinate(self) else {
            return Ok(None);
        };
        grid_index_range(&self.coordinate_id, &grid, minimum, maximum, method).map(Some)
    }
}

pub(crate) fn grid_index_range(
    coordinate_id: &str,
    grid: &Grid,
    minimum: Option<f64>,
    maximum: Option<f64>,
    method: CoordinatesSelectionMethod,
) -> Result<IndexSelection, Error> {
    let n = grid.len();
    if n == 0 {
        return Err(Error::CoordinatesOutOfDatasetBounds(format!(
            "coordinate '{coordinate_id}' has no values"
        )));
    }
    let ascending = grid.value(n - 1) >= grid.value(0);
    // positions walk the grid in ascending value order
    let v = |p: u64| {
        if ascending {
            grid.value(p)
        } else {
            grid.value(n - 1 - p)
        }
    };
    let (vmin, vmax) = (v(0), v(n - 1));
    let spacing = if n > 1 {
        (vmax - vmin) / (n - 1) as f64
    } else {
        1.0
    };
    let eps = spacing.abs().max(f64::MIN_POSITIVE) * 1e-6;

    let lo = minimum.unwrap_or(vmin);
    let hi = maximum.unwrap_or(vmax);
    if hi < vmin - eps || lo > vmax + eps {
        return Err(Error::CoordinatesOutOfDatasetBounds(format!(
            "some or all of your subset selection [{lo}, {hi}] for the {coordinate_id} dimension exceed the dataset coordinates [{vmin}, {vmax}]"
        )));
    }

    let first_ge = |x: f64| partition_point(n, |p| v(p) < x - eps);
    let count_le = |x: f64| partition_point(n, |p| v(p) <= x + eps);
    let nearest = |x: f64| {
        let p = first_ge(x).min(n - 1);
        if p > 0 && (x - v(p - 1)).abs() <= (v(p) - x).abs() {
            p - 1
        } else {
            p
        }
    };

    let beyond = lo < vmin - eps || hi > vmax + eps;
    let (a, b) = match method {
        CoordinatesSelectionMethod::StrictInside if beyond => {
            return Err(Error::CoordinatesOutOfDatasetBounds(format!(
                "some of your subset selection [{lo}, {hi}] for the {coordinate_id} dimension exceed the dataset coordinates [{vmin}, {vmax}]"
            )));
        }
        CoordinatesSelectionMethod::Inside | CoordinatesSelectionMethod::StrictInside => {
            if beyond {
                warn!(
                    coordinate = coordinate_id,
                    requested_minimum = lo,
                    requested_maximum = hi,
                    dataset_minimum = vmin,
                    dataset_maximum = vmax,
                    "selection exceeds the dataset extent and was clipped"
                );
            }
            let (a, b) = (first_ge(lo), count_le(hi));
            if a >= b {
                let p = nearest((lo + hi) / 2.0);
                (p, p + 1)
            } else {
                (a, b)
            }
        }
        CoordinatesSelectionMethod::Nearest => {
            let (a, b) = (nearest(lo), nearest(hi) + 1);
            if b <= a { (a, a + 1) } else { (a, b) }
        }
        CoordinatesSelectionMethod::Outside => {
            let a = count_le(lo).saturating_sub(1);
            let b = first_ge(hi).min(n - 1) + 1;
            (a, b.max(a + 1))
        }
    };

    let range = if ascending { a..b } else { (n - b)..(n - a) };
    Ok(IndexSelection {
        minimum: v(a),
        maximum: v(b - 1),
        range,
    })
}

/// Longitude bounds for a grid starting at `grid_minimum`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LongitudeBounds {
    Whole,
    Bounds(Option<f64>, Option<f64>),
}

pub(crate) fn normalize_longitudes(
    minimum: Option<f64>,
    maximum: Option<f64>,
    grid_minimum: f64,
) -> LongitudeBounds {
    if let (Some(lo), Some(hi)) = (minimum, maximum) {
        if hi - lo >= 360.0 {
            return LongitudeBounds::Whole;
        }
    }
    let window = if grid_minimum < 0.0 { -180.0 } else { 0.0 };
    let norm = |x: f64| {
        if (window..=window + 360.0).contains(&x) {
            x
        } else {
            window + (x - window).rem_euclid(360.0)
        }
    };
    let (lo, hi) = (minimum.map(norm), maximum.map(norm));
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if lo > hi {
            warn!(
                minimum_longitude = lo,
                maximum_longitude = hi,
                "the longitude selection crosses the antimeridian, selecting all longitudes"
            );
            return LongitudeBounds::Whole;
        }
    }
    LongitudeBounds::Bounds(lo, hi)
}

/// One coordinate of the output with its selected indices (`None`: whole remote axis).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AxisSelection {
    pub(crate) coordinate_id: String,
    pub(crate) axis: CoordinateAxis,
    pub(crate) units: String,
    pub(crate) selection: Option<IndexSelection>,
}

impl AxisSelection {
    pub(crate) fn extent(&self) -> Option<CoordinatesExtent> {
        let s = self.selection.as_ref()?;
        let (minimum, maximum) = match (self.axis, TimeUnits::parse(&self.units)) {
            (CoordinateAxis::T, Some(units)) => (
                Value::from(units.to_datetime(s.minimum).to_rfc3339()),
                Value::from(units.to_datetime(s.maximum).to_rfc3339()),
            ),
            _ => (Value::from(s.minimum), Value::from(s.maximum)),
        };
        Some(CoordinatesExtent {
            coordinate_id: self.coordinate_id.clone(),
            minimum,
            maximum,
            unit: self.units.clone(),
        })
    }
}

fn is_elevation(c: &Coordinate) -> bool {
    c.coordinate_id == "elevation"
}

/// Index selections of every coordinate used by `variables`.
pub(crate) fn select_axes(
    variables: &[&Variable],
    request: &SubsetRequest,
) -> Result<Vec<AxisSelection>> {
    let method = request.coordinates_selection_method;
    let mut seen: Vec<&Coordinate> = Vec::new();
    for c in variables.iter().flat_map(|v| v.coordinates.iter()) {
        if !seen.iter().any(|s| s.coordinate_id == c.coordinate_id) {
            seen.push(c);
        }
    }

    let start = request.start_datetime.as_deref().map(parse_datetime).transpose()?;
    let end = request.end_datetime.as_deref().map(parse_datetime).transpose()?;

    let mut out = Vec::with_capacity(seen.len());
    for c in seen {
        let bounds = match c.axis {
            CoordinateAxis::X => {
                if request.minimum_longitude.is_none() && request.maximum_longitude.is_none() {
                    None
                } else {
                    let grid_minimum = Grid::from_coordinate(c)
                        .map(|g| g.value(0).min(g.value(g.len().saturating_sub(1))))
                        .unwrap_or(-180.0);
                    match normalize_longitudes(
                        request.minimum_longitude,
                        request.maximum_longitude,
                        grid_minimum,
                    ) {
                        LongitudeBounds::Whole => None,
                        LongitudeBounds::Bounds(lo, hi) => Some((lo, hi)),
                    }
                }
            }
            CoordinateAxis::Y => Some((request.minimum_latitude, request.maximum_latitude)),
            CoordinateAxis::Z if is_elevation(c) => Some((
                request.maximum_depth.map(|d| -d),
                request.minimum_depth.map(|d| -d),
            )),
            CoordinateAxis::Z => Some((request.minimum_depth, request.maximum_depth)),
            CoordinateAxis::T if start.is_some() || end.is_some() => {
                let units = TimeUnits::parse(&c.units).ok_or_else(|| {
                    anyhow::anyhow!(
                        "cannot interpret the units '{}' of the {} coordinate",
                        c.units,
                        c.coordinate_id
                    )
                })?;
                Some((start.map(|t| units.to_value(t)), end.map(|t| units.to_value(t))))
            }
            _ => None,
        };

        let selection = match bounds {
            Some((lo, hi)) => c.index_range(lo, hi, method)?,
            None => c.index_range(None, None, method)?,
        };
        if selection.is_none() && bounds.is_some_and(|(lo, hi)| lo.is_some() || hi.is_some()) {
            warn!(
                coordinate = %c.coordinate_id,
                "coordinate values are not described in the catalogue, selecting the whole axis"
            );
        }
        out.push(AxisSelection {
            coordinate_id: c.coordinate_id.clone(),
            axis: c.axis,
            units: c.units.clone(),
            selection,
        });
    }

    if request.vertical_axis == VerticalAxis::Elevation {
        for a in &mut out {
            if a.axis == CoordinateAxis::Z && a.coordinate_id == "depth" {
                if let Some(s) = &mut a.selection {
                    (s.minimum, s.maximum) = (-s.maximum, -s.minimum);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn regular(id: &str, axis: CoordinateAxis, min: f64, max: f64, step: f64) -> Coordinate {
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

    fn depth() -> Coordinate {
        Coordinate {
            values: Some(vec![0.5, 1.5, 2.6, 3.8, 5.1]),
            minimum_value: None,
            maximum_value: None,
            step: None,
            units: "m".into(),
            ..regular("depth", CoordinateAxis::Z, 0.0, 0.0, 1.0)
        }
    }

    use CoordinatesSelectionMethod::*;

    #[test]
    fn inside_selection() {
        let lat = regular("latitude", CoordinateAxis::Y, -80.0, 90.0, 0.25);
        let s = lat.index_range(Some(10.1), Some(11.0), Inside).unwrap().unwrap();
        assert_eq!(s.range, 361..365);
        assert_eq!((s.minimum, s.maximum), (10.25, 11.0));

        // no point inside: nearest grid point to the interval
        let s = lat.index_range(Some(10.05), Some(10.1), Inside).unwrap().unwrap();
        assert_eq!(s.range, 360..361);
    }

    #[test]
    fn clipping_and_strict() {
        let d = depth();
        let s = d.index_range(Some(1.0), Some(50.0), Inside).unwrap().unwrap();
        assert_eq!(s.range, 1..5);
        let err = d.index_range(Some(1.0), Some(50.0), StrictInside).unwrap_err();
        assert_eq!(err.kind(), "CoordinatesOutOfDatasetBounds");
        let err = d.index_range(Some(100.0), Some(200.0), Inside).unwrap_err();
        assert_eq!(err.kind(), "CoordinatesOutOfDatasetBounds");
    }

    #[test]
    fn nearest_and_outside() {
        let d = depth();
        let s = d.index_range(Some(1.2), Some(3.0), Nearest).unwrap().unwrap();
        assert_eq!(s.range, 1..3);
        let s = d.index_range(Some(1.2), Some(3.0), Outside).unwrap().unwrap();
        assert_eq!(s.range, 0..4);
        assert_eq!((s.minimum, s.maximum), (0.5, 3.8));
    }

    #[test]
    fn descending_grid() {
        let lat = Coordinate {
            values: Some(vec![40.0, 39.0, 38.0, 37.0]),
            ..regular("latitude", CoordinateAxis::Y, 0.0, 0.0, 1.0)
        };
        let s = lat.index_range(Some(37.5), Some(39.0), Inside).unwrap().unwrap();
        assert_eq!(s.range, 1..3);
        assert_eq!((s.minimum, s.maximum), (38.0, 39.0));
    }

    #[test]
    fn longitude_normalisation() {
        assert_eq!(
            normalize_longitudes(Some(190.0), Some(200.0), -180.0),
            LongitudeBounds::Bounds(Some(-170.0), Some(-160.0))
        );
        assert_eq!(
            normalize_longitudes(Some(-10.0), Some(10.0), 0.0),
            LongitudeBounds::Whole
        );
        assert_eq!(
            normalize_longitudes(Some(-180.0), Some(179.0), -180.0),
            LongitudeBounds::Bounds(Some(-180.0), Some(179.0))
        );
        assert_eq!(
            normalize_longitudes(Some(-500.0), Some(500.0), -180.0),
            LongitudeBounds::Whole
        );
        assert_eq!(
            normalize_longitudes(Some(170.0), Some(190.0), -180.0),
            LongitudeBounds::Whole
        );
    }

    #[test]
    fn axes_for_request() {
        let time = Coordinate {
            units: "milliseconds since 1970-01-01 00:00:00".into(),
            ..regular(
                "time",
                CoordinateAxis::T,
                1_672_531_200_000.0,
                1_675_123_200_000.0,
                86_400_000.0,
            )
        };
        let variable = Variable {
            short_name: "thetao".into(),
            coordinates: vec![
                time,
                depth(),
                regular("latitude", CoordinateAxis::Y, -80.0, 90.0, 0.25),
                regular("longitude", CoordinateAxis::X, -180.0, 179.75, 0.25),
            ],
            ..Variable::default()
        };
        let request = SubsetRequest {
            start_datetime: Some("2023-01-02".into()),
            end_datetime: Some("2023-01-03T12:00:00".into()),
            minimum_longitude: Some(350.0),
            maximum_longitude: Some(355.0),
            minimum_depth: Some(1.0),
            maximum_depth: Some(3.0),
            vertical_axis: VerticalAxis::Elevation,
            ..SubsetRequest::default()
        };
        let axes = select_axes(&[&variable], &request).unwrap();
        let by_id = |id: &str| axes.iter().find(|a| a.coordinate_id == id).unwrap().clone();

        assert_eq!(by_id("time").selection.unwrap().range, 1..3);
        assert_eq!(by_id("longitude").selection.unwrap().range, 680..701);
        assert_eq!(by_id("latitude").selection.unwrap().range, 0..681);
        let z = by_id("depth").selection.unwrap();
        assert_eq!(z.range, 1..3);
        assert_eq!((z.minimum, z.maximum), (-2.6, -1.5));

        let extent = by_id("time").extent().unwrap();
        assert_eq!(extent.minimum, Value::from("2023-01-02T00:00:00+00:00"));
    }
}
