//! Selecting spatial sub-regions of a dump.
//!
//! A `Selector` is what a caller asks for: three axis selectors, each an index or a range, with
//! negative values counting back from the end of the axis. A `Region` is where a dump actually
//! sits within the file's domain: three absolute extents. Selectors are always interpreted
//! relative to the region they're applied to, so slicing an already sliced dump composes.
//!
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use ndarray::{ArrayD, Axis, Slice};

use crate::errors::{Error, Result};
use crate::field::Field;

/// Selection along a single axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisSelector {
    /// A single index. The axis is dropped from selected arrays.
    Index(isize),

    /// A half open range. Missing bounds extend to the ends of the axis.
    Range {
        start: Option<isize>,
        stop: Option<isize>,
    },
}

impl AxisSelector {
    /// The whole axis
    pub const ALL: AxisSelector = AxisSelector::Range {
        start: None,
        stop: None,
    };

    /// Whether this selector actually restricts anything. A range with no bounds does not.
    pub fn is_concrete(&self) -> bool {
        match self {
            AxisSelector::Index(_) => true,
            AxisSelector::Range { start, stop } => start.is_some() || stop.is_some(),
        }
    }

    /// Resolve this selector against an axis of length `len`, yielding an extent relative to the
    /// start of that axis.
    pub fn resolve(&self, len: usize) -> Result<Extent> {
        let signed_len = isize::try_from(len).map_err(|_| {
            Error::MalformedSelector(format!("axis length {len} is too long to index"))
        })?;
        match *self {
            AxisSelector::Index(index) => {
                let resolved = if index < 0 { index + signed_len } else { index };
                if resolved < 0 || resolved >= signed_len {
                    Err(Error::MalformedSelector(format!(
                        "index {index} is out of bounds for axis with length {len}"
                    )))
                } else {
                    // Checked against 0 above
                    Ok(Extent::Index(resolved as usize))
                }
            }
            AxisSelector::Range { start, stop } => {
                let clamp = |bound: isize| {
                    let bound = if bound < 0 { bound + signed_len } else { bound };
                    // Clamped to 0..=len, so the cast is lossless
                    bound.clamp(0, signed_len) as usize
                };
                let start = start.map_or(0, clamp);
                let stop = stop.map_or(len, clamp).max(start);

                Ok(Extent::Range { start, stop })
            }
        }
    }
}

impl From<isize> for AxisSelector {
    fn from(index: isize) -> Self {
        AxisSelector::Index(index)
    }
}

impl From<Range<isize>> for AxisSelector {
    fn from(range: Range<isize>) -> Self {
        AxisSelector::Range {
            start: Some(range.start),
            stop: Some(range.end),
        }
    }
}

impl From<RangeFrom<isize>> for AxisSelector {
    fn from(range: RangeFrom<isize>) -> Self {
        AxisSelector::Range {
            start: Some(range.start),
            stop: None,
        }
    }
}

impl From<RangeTo<isize>> for AxisSelector {
    fn from(range: RangeTo<isize>) -> Self {
        AxisSelector::Range {
            start: None,
            stop: Some(range.end),
        }
    }
}

impl From<RangeFull> for AxisSelector {
    fn from(_: RangeFull) -> Self {
        AxisSelector::ALL
    }
}

/// A request for a sub-region of a dump: one selector per spatial axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selector([AxisSelector; 3]);

impl Selector {
    pub fn new(
        axis1: impl Into<AxisSelector>,
        axis2: impl Into<AxisSelector>,
        axis3: impl Into<AxisSelector>,
    ) -> Self {
        Self([axis1.into(), axis2.into(), axis3.into()])
    }

    pub fn axes(&self) -> &[AxisSelector; 3] {
        &self.0
    }

    /// A selector is concrete if any of its axes actually restricts the domain.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().any(AxisSelector::is_concrete)
    }
}

impl From<[AxisSelector; 3]> for Selector {
    fn from(axes: [AxisSelector; 3]) -> Self {
        Self(axes)
    }
}

impl TryFrom<&[AxisSelector]> for Selector {
    type Error = Error;

    fn try_from(axes: &[AxisSelector]) -> Result<Self> {
        match axes {
            [axis1, axis2, axis3] => Ok(Self([*axis1, *axis2, *axis3])),
            _ => Err(Error::MalformedSelector(format!(
                "expecting 3 axes, got {}",
                axes.len()
            ))),
        }
    }
}

/// Where an axis of a region sits in the domain it was taken from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extent {
    /// A single index. The axis is collapsed.
    Index(usize),

    /// Half open range `start..stop`
    Range { start: usize, stop: usize },
}

impl Extent {
    /// Number of entries along this axis, or `None` if the axis is collapsed
    pub fn len(&self) -> Option<usize> {
        match self {
            Extent::Index(_) => None,
            Extent::Range { start, stop } => Some(stop - start),
        }
    }
}

/// The part of a file's spatial domain a dump covers, in absolute indices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    extents: [Extent; 3],
}

impl Region {
    pub fn new(extents: [Extent; 3]) -> Self {
        Self { extents }
    }

    /// The whole domain of a file with the given shape
    pub fn full(shape: [usize; 3]) -> Self {
        let [n1, n2, n3] = shape;
        Self {
            extents: [
                Extent::Range { start: 0, stop: n1 },
                Extent::Range { start: 0, stop: n2 },
                Extent::Range { start: 0, stop: n3 },
            ],
        }
    }

    pub fn extents(&self) -> &[Extent; 3] {
        &self.extents
    }

    /// Shape of arrays restricted to this region. Collapsed axes don't appear.
    pub fn shape(&self) -> Vec<usize> {
        self.extents.iter().filter_map(Extent::len).collect()
    }

    /// Number of axes that aren't collapsed
    pub fn ndim(&self) -> usize {
        self.extents.iter().filter(|extent| extent.len().is_some()).count()
    }

    /// The region obtained by applying `selector` to this region.
    ///
    /// Selectors index relative to this region. A collapsed axis can only take a selector that
    /// isn't concrete.
    ///
    pub fn compose(&self, selector: &Selector) -> Result<Region> {
        let mut extents = self.extents;
        for (axis, (extent, selection)) in self.extents.iter().zip(selector.axes()).enumerate() {
            extents[axis] = match *extent {
                Extent::Index(_) if selection.is_concrete() => {
                    return Err(Error::MalformedSelector(format!(
                        "axis {axis} has already been reduced to a single index"
                    )));
                }
                Extent::Index(index) => Extent::Index(index),
                Extent::Range { start, stop } => match selection.resolve(stop - start)? {
                    Extent::Index(index) => Extent::Index(start + index),
                    Extent::Range {
                        start: sub_start,
                        stop: sub_stop,
                    } => Extent::Range {
                        start: start + sub_start,
                        stop: start + sub_stop,
                    },
                },
            };
        }

        Ok(Region { extents })
    }

    /// Absolute cell index, in the file's domain, of `index` into an array restricted to this
    /// region. `index` covers only the spatial axes.
    pub fn absolute(&self, index: &[usize]) -> [usize; 3] {
        let mut cell = [0; 3];
        let mut spatial = index.iter();
        for (axis, extent) in self.extents.iter().enumerate() {
            cell[axis] = match extent {
                Extent::Index(index) => *index,
                Extent::Range { start, .. } => start + spatial.next().copied().unwrap_or(0),
            };
        }

        cell
    }

    /// Restrict an array whose trailing three axes span the file's whole domain to this region.
    pub fn apply<T: Clone>(&self, name: &str, array: &ArrayD<T>) -> Result<ArrayD<T>> {
        if array.ndim() < 3 {
            return Err(Error::shape_mismatch(name, &[0, 0, 0], array.shape()));
        }
        let offset = array.ndim() - 3;
        let mut steps = Vec::with_capacity(3);
        for (axis, extent) in self.extents.iter().enumerate() {
            let len = array.len_of(Axis(offset + axis));
            let end = match extent {
                Extent::Index(index) => index + 1,
                Extent::Range { stop, .. } => *stop,
            };
            if end > len {
                return Err(Error::IndexOutOfRange {
                    key: name.to_string(),
                    index: end - 1,
                    len,
                });
            }
            steps.push((offset + axis, *extent));
        }

        Ok(restrict(array, steps))
    }

    pub fn apply_field(&self, name: &str, field: &Field) -> Result<Field> {
        Ok(match field {
            Field::F64(array) => Field::F64(self.apply(name, array)?),
            Field::I32(array) => Field::I32(self.apply(name, array)?),
        })
    }
}

/// Restrict an array belonging to a dump with region `region` by `selector`.
///
/// The array's trailing axes are the region's non-collapsed axes. Arrays with fewer axes than
/// that (reductions to a scalar, for instance) have no spatial extent to select from and are
/// copied unchanged.
///
pub(crate) fn select<T: Clone>(
    name: &str,
    array: &ArrayD<T>,
    selector: &Selector,
    region: &Region,
) -> Result<ArrayD<T>> {
    let spatial = region.ndim();
    if array.ndim() < spatial {
        return Ok(array.clone());
    }

    let mut axis = array.ndim() - spatial;
    let mut steps = Vec::with_capacity(3);
    for (extent, selection) in region.extents().iter().zip(selector.axes()) {
        match extent {
            Extent::Index(_) => {
                if selection.is_concrete() {
                    return Err(Error::MalformedSelector(format!(
                        "{name}: cannot index an axis that has already been reduced"
                    )));
                }
            }
            Extent::Range { .. } => {
                steps.push((axis, selection.resolve(array.len_of(Axis(axis)))?));
                axis += 1;
            }
        }
    }

    Ok(restrict(array, steps))
}

pub(crate) fn select_field(
    name: &str,
    field: &Field,
    selector: &Selector,
    region: &Region,
) -> Result<Field> {
    Ok(match field {
        Field::F64(array) => Field::F64(select(name, array, selector, region)?),
        Field::I32(array) => Field::I32(select(name, array, selector, region)?),
    })
}

/// Apply per-axis extents to an array. Axes are processed from last to first so that removing
/// an axis doesn't shift the ones still to be processed.
fn restrict<T: Clone>(array: &ArrayD<T>, mut steps: Vec<(usize, Extent)>) -> ArrayD<T> {
    steps.sort_by(|a, b| b.0.cmp(&a.0));
    let mut view = array.view();
    for (axis, extent) in steps {
        view = match extent {
            Extent::Index(index) => view.index_axis_move(Axis(axis), index),
            Extent::Range { start, stop } => {
                view.slice_axis_inplace(Axis(axis), Slice::from(start..stop));
                view
            }
        };
    }

    view.to_owned()
}
