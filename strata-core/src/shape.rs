use crate::error::StrataError;
use std::ops::Range;

/// Shape of tensor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shape(Box<[usize]>);

impl Shape {
    /// Get shape's rank
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.0.len()
    }

    /// Get number of elements in tensor with this shape
    /// (a product of it's dimensions).
    #[must_use]
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Iter
    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.into_iter()
    }

    /// Dimensions as slice
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Dimension at axis, error if axis is out of range
    pub fn dim(&self, axis: usize) -> Result<usize, StrataError> {
        self.0.get(axis).copied().ok_or_else(|| {
            StrataError::shape_error(format!("axis {axis} is out of range for shape {self}"))
        })
    }

    /// Copy of self with dimension at axis replaced
    #[must_use]
    pub fn with_dim(&self, axis: usize, dim: usize) -> Shape {
        let mut dims = self.0.clone();
        dims[axis] = dim;
        Shape(dims)
    }

    /// Product of dimensions before axis, the dimension itself and product of dimensions after axis
    #[must_use]
    pub fn split_at_axis(&self, axis: usize) -> (usize, usize, usize) {
        let outer = self.0[..axis].iter().product();
        let inner = self.0[axis + 1..].iter().product();
        (outer, self.0[axis], inner)
    }

    /// Reduce self along axes
    #[must_use]
    pub fn reduce(&self, axes: &[usize], keepdims: bool) -> Shape {
        if keepdims {
            self.0
                .iter()
                .enumerate()
                .map(|(a, d)| if axes.contains(&a) { 1 } else { *d })
                .collect::<Vec<usize>>()
                .into()
        } else {
            self.0
                .iter()
                .enumerate()
                .filter(|(a, _)| !axes.contains(a))
                .map(|(_, d)| *d)
                .collect::<Vec<usize>>()
                .into()
        }
    }
}

/// Splits `dim` into `parts` contiguous ranges whose sizes differ by at most one,
/// with the larger ranges first.
#[must_use]
pub fn balanced_split(dim: usize, parts: usize) -> Vec<Range<usize>> {
    let base = dim / parts;
    let rem = dim % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < rem);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self.0))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(value: Vec<usize>) -> Self {
        Shape(value.into_boxed_slice())
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Shape(value.iter().copied().collect())
    }
}

impl From<usize> for Shape {
    fn from(value: usize) -> Self {
        Shape(Box::new([value]))
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Shape(value.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Shape {
    type IntoIter = <&'a [usize] as IntoIterator>::IntoIter;
    type Item = &'a usize;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = usize;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_split_puts_remainder_first() {
        assert_eq!(balanced_split(7, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(balanced_split(2, 4), vec![0..1, 1..2, 2..2, 2..2]);
    }

    #[test]
    fn reduce_shape() {
        let sh: Shape = [2, 3, 4].into();
        assert_eq!(sh.reduce(&[1], true), [2, 1, 4].into());
        assert_eq!(sh.reduce(&[0, 2], false), Shape::from(3));
    }
}
