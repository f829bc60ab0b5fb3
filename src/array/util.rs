use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Slice};
use smallvec::SmallVec;

use crate::array::error::ArrayError;

pub type Shape = SmallVec<[usize; 4]>;

pub fn num_elements(shape: &[usize]) -> Result<usize, ArrayError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or(ArrayError::ShapeOverflow)
}

/// Whether an array of `shape` stays within the `isize::MAX` limit ndarray
/// and `Vec` put on element count and byte size.
pub fn allocatable(shape: &[usize], element_size: usize) -> bool {
    shape
        .iter()
        .filter(|&&d| d != 0)
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(element_size.max(1)))
        .is_some_and(|bytes| bytes <= isize::MAX as usize)
}

/// Componentwise `max(shape, origin + extent)`.
pub fn extended_shape(shape: &[usize], origin: &[usize], extent: &[usize]) -> Shape {
    shape
        .iter()
        .zip(origin.iter().zip(extent))
        .map(|(&s, (&o, &e))| s.max(o + e))
        .collect()
}

pub(crate) fn check_region(
    available: &[usize],
    origin: &[usize],
    shape: &[usize],
) -> Result<(), ArrayError> {
    if origin.len() != available.len() {
        return Err(ArrayError::RankMismatch {
            expected: available.len(),
            actual: origin.len(),
        });
    }
    if shape.len() != available.len() {
        return Err(ArrayError::RankMismatch {
            expected: available.len(),
            actual: shape.len(),
        });
    }
    let fits = available
        .iter()
        .zip(origin.iter().zip(shape))
        .all(|(&a, (&o, &s))| o.checked_add(s).is_some_and(|end| end <= a));
    if !fits {
        return Err(ArrayError::OutOfRange {
            origin: origin.into(),
            shape: shape.into(),
            available: available.into(),
        });
    }
    Ok(())
}

pub(crate) fn region<'a, T>(
    array: &'a ArrayD<T>,
    origin: &[usize],
    shape: &[usize],
) -> ArrayViewD<'a, T> {
    array.slice_each_axis(|ax| {
        let i = ax.axis.index();
        Slice::from(origin[i]..origin[i] + shape[i])
    })
}

pub(crate) fn region_mut<'a, T>(
    array: &'a mut ArrayD<T>,
    origin: &[usize],
    shape: &[usize],
) -> ArrayViewMutD<'a, T> {
    array.slice_each_axis_mut(|ax| {
        let i = ax.axis.index();
        Slice::from(origin[i]..origin[i] + shape[i])
    })
}

/// Copy `array` into a larger array of `shape`, filling new cells with `fill`.
pub(crate) fn grow<T: Clone>(array: &ArrayD<T>, shape: &[usize], fill: T) -> ArrayD<T> {
    let mut out = ArrayD::from_elem(IxDyn(shape), fill);
    let zeros = vec![0; shape.len()];
    region_mut(&mut out, &zeros, array.shape()).assign(array);
    out
}
