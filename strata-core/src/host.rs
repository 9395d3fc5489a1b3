//! Typed host side buffers.
//!
//! [`HostData`] is how values cross the boundary between the core and a
//! [`KernelBackend`](crate::backend::KernelBackend): tensors are stored from
//! and loaded into host data, and layout conversions between distributed
//! components (split, concat, partial sum) are done on it.

use crate::dtype::DType;
use crate::error::StrataError;
use crate::shape::Shape;
use half::{bf16, f16};
use std::ops::Range;

/// Contiguous row major host buffer of one dtype
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    /// bf16
    BF16(Vec<bf16>),
    /// f16
    F16(Vec<f16>),
    /// f32
    F32(Vec<f32>),
    /// f64
    F64(Vec<f64>),
    /// u8
    U8(Vec<u8>),
    /// i8
    I8(Vec<i8>),
    /// i32
    I32(Vec<i32>),
    /// i64
    I64(Vec<i64>),
    /// bool
    Bool(Vec<bool>),
}

/// Applies the same generic expression to the vector of any variant,
/// rewrapping the result in the same variant.
#[macro_export]
macro_rules! map_host_data {
    ($data: expr, $v: ident => $e: expr) => {
        match $data {
            $crate::host::HostData::BF16($v) => $crate::host::HostData::BF16($e),
            $crate::host::HostData::F16($v) => $crate::host::HostData::F16($e),
            $crate::host::HostData::F32($v) => $crate::host::HostData::F32($e),
            $crate::host::HostData::F64($v) => $crate::host::HostData::F64($e),
            $crate::host::HostData::U8($v) => $crate::host::HostData::U8($e),
            $crate::host::HostData::I8($v) => $crate::host::HostData::I8($e),
            $crate::host::HostData::I32($v) => $crate::host::HostData::I32($e),
            $crate::host::HostData::I64($v) => $crate::host::HostData::I64($e),
            $crate::host::HostData::Bool($v) => $crate::host::HostData::Bool($e),
        }
    };
}

/// Rust scalar types that have a matching [`DType`]
pub trait Element: Copy + Send + Sync + std::fmt::Debug + 'static {
    /// Matching dtype
    const DTYPE: DType;
    /// Wrap vector
    fn into_host(data: Vec<Self>) -> HostData;
    /// Unwrap vector, None if dtype differs
    fn from_host(data: HostData) -> Option<Vec<Self>>;
}

macro_rules! element {
    ($t: ty, $variant: ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$variant;
            fn into_host(data: Vec<Self>) -> HostData {
                HostData::$variant(data)
            }
            fn from_host(data: HostData) -> Option<Vec<Self>> {
                match data {
                    HostData::$variant(x) => Some(x),
                    _ => None,
                }
            }
        }
    };
}

element!(bf16, BF16);
element!(f16, F16);
element!(f32, F32);
element!(f64, F64);
element!(u8, U8);
element!(i8, I8);
element!(i32, I32);
element!(i64, I64);
element!(bool, Bool);

impl<T: Element> From<Vec<T>> for HostData {
    fn from(value: Vec<T>) -> Self {
        T::into_host(value)
    }
}

fn split_slice<T: Copy>(data: &[T], (outer, dim, inner): (usize, usize, usize), ranges: &[Range<usize>]) -> Vec<Vec<T>> {
    ranges
        .iter()
        .map(|r| {
            let mut part = Vec::with_capacity(outer * r.len() * inner);
            for o in 0..outer {
                part.extend_from_slice(&data[(o * dim + r.start) * inner..(o * dim + r.end) * inner]);
            }
            part
        })
        .collect()
}

fn concat_slices<T: Copy>(parts: &[(&[T], usize)], outer: usize, inner: usize) -> Vec<T> {
    let mut res = Vec::with_capacity(parts.iter().map(|(p, _)| p.len()).sum());
    for o in 0..outer {
        for (part, dim) in parts {
            res.extend_from_slice(&part[o * dim * inner..(o + 1) * dim * inner]);
        }
    }
    res
}

impl HostData {
    /// Dtype of data
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            HostData::BF16(_) => DType::BF16,
            HostData::F16(_) => DType::F16,
            HostData::F32(_) => DType::F32,
            HostData::F64(_) => DType::F64,
            HostData::U8(_) => DType::U8,
            HostData::I8(_) => DType::I8,
            HostData::I32(_) => DType::I32,
            HostData::I64(_) => DType::I64,
            HostData::Bool(_) => DType::Bool,
        }
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            HostData::BF16(x) => x.len(),
            HostData::F16(x) => x.len(),
            HostData::F32(x) => x.len(),
            HostData::F64(x) => x.len(),
            HostData::U8(x) => x.len(),
            HostData::I8(x) => x.len(),
            HostData::I32(x) => x.len(),
            HostData::I64(x) => x.len(),
            HostData::Bool(x) => x.len(),
        }
    }

    /// Is data empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// n zeros of dtype
    #[must_use]
    pub fn zeros(dtype: DType, n: usize) -> HostData {
        HostData::from_f64(dtype, &vec![0.0; n])
    }

    /// n ones of dtype
    #[must_use]
    pub fn ones(dtype: DType, n: usize) -> HostData {
        HostData::from_f64(dtype, &vec![1.0; n])
    }

    /// Converts f64 values into dtype, integers are truncated
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(dtype: DType, values: &[f64]) -> HostData {
        let it = values.iter().copied();
        match dtype {
            DType::BF16 => HostData::BF16(it.map(bf16::from_f64).collect()),
            DType::F16 => HostData::F16(it.map(f16::from_f64).collect()),
            DType::F32 => HostData::F32(it.map(|x| x as f32).collect()),
            DType::F64 => HostData::F64(it.collect()),
            DType::U8 => HostData::U8(it.map(|x| x as u8).collect()),
            DType::I8 => HostData::I8(it.map(|x| x as i8).collect()),
            DType::I32 => HostData::I32(it.map(|x| x as i32).collect()),
            DType::I64 => HostData::I64(it.map(|x| x as i64).collect()),
            DType::Bool => HostData::Bool(it.map(|x| x != 0.0).collect()),
        }
    }

    /// All values as f64
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            HostData::BF16(x) => x.iter().map(|x| x.to_f64()).collect(),
            HostData::F16(x) => x.iter().map(|x| x.to_f64()).collect(),
            HostData::F32(x) => x.iter().map(|x| f64::from(*x)).collect(),
            HostData::F64(x) => x.clone(),
            HostData::U8(x) => x.iter().map(|x| f64::from(*x)).collect(),
            HostData::I8(x) => x.iter().map(|x| f64::from(*x)).collect(),
            HostData::I32(x) => x.iter().map(|x| f64::from(*x)).collect(),
            HostData::I64(x) => x.iter().map(|x| *x as f64).collect(),
            HostData::Bool(x) => x.iter().map(|x| f64::from(u8::from(*x))).collect(),
        }
    }

    /// Converts data into different dtype
    #[must_use]
    pub fn cast(&self, dtype: DType) -> HostData {
        if self.dtype() == dtype {
            return self.clone();
        }
        HostData::from_f64(dtype, &self.to_f64())
    }

    /// Unwraps typed vector
    pub fn into_vec<T: Element>(self) -> Result<Vec<T>, StrataError> {
        let dtype = self.dtype();
        T::from_host(self).ok_or_else(|| {
            StrataError::dtype_error(format!("can not read {dtype} data as {}", T::DTYPE))
        })
    }

    /// Splits data of given shape into contiguous parts along axis
    pub fn split(&self, shape: &Shape, axis: usize, ranges: &[Range<usize>]) -> Result<Vec<HostData>, StrataError> {
        self.check_len(shape)?;
        shape.dim(axis)?;
        let dims = shape.split_at_axis(axis);
        Ok(match self {
            HostData::BF16(x) => split_slice(x, dims, ranges).into_iter().map(HostData::BF16).collect(),
            HostData::F16(x) => split_slice(x, dims, ranges).into_iter().map(HostData::F16).collect(),
            HostData::F32(x) => split_slice(x, dims, ranges).into_iter().map(HostData::F32).collect(),
            HostData::F64(x) => split_slice(x, dims, ranges).into_iter().map(HostData::F64).collect(),
            HostData::U8(x) => split_slice(x, dims, ranges).into_iter().map(HostData::U8).collect(),
            HostData::I8(x) => split_slice(x, dims, ranges).into_iter().map(HostData::I8).collect(),
            HostData::I32(x) => split_slice(x, dims, ranges).into_iter().map(HostData::I32).collect(),
            HostData::I64(x) => split_slice(x, dims, ranges).into_iter().map(HostData::I64).collect(),
            HostData::Bool(x) => split_slice(x, dims, ranges).into_iter().map(HostData::Bool).collect(),
        })
    }

    /// Concatenates parts along axis, parts must agree on every other dimension and on dtype
    pub fn concat(parts: &[(HostData, Shape)], axis: usize) -> Result<(HostData, Shape), StrataError> {
        let Some((first, first_shape)) = parts.first() else {
            return Err(StrataError::shape_error("concat of zero parts"));
        };
        let mut dim = 0;
        for (data, shape) in parts {
            data.check_len(shape)?;
            if data.dtype() != first.dtype() {
                return Err(StrataError::dtype_error(format!(
                    "concat of {} and {}",
                    first.dtype(),
                    data.dtype()
                )));
            }
            if shape.rank() != first_shape.rank()
                || shape.iter().zip(first_shape).enumerate().any(|(a, (x, y))| a != axis && x != y)
            {
                return Err(StrataError::shape_error(format!(
                    "can not concat {first_shape} and {shape} along axis {axis}"
                )));
            }
            dim += shape.dim(axis)?;
        }
        let (outer, _, inner) = first_shape.split_at_axis(axis);
        macro_rules! cat {
            ($variant: ident) => {{
                let slices = parts
                    .iter()
                    .map(|(d, s)| match d {
                        HostData::$variant(x) => Ok((x.as_slice(), s[axis])),
                        _ => Err(StrataError::dtype_error("mixed dtypes in concat")),
                    })
                    .collect::<Result<Vec<_>, StrataError>>()?;
                HostData::$variant(concat_slices(&slices, outer, inner))
            }};
        }
        let data = match first {
            HostData::BF16(_) => cat!(BF16),
            HostData::F16(_) => cat!(F16),
            HostData::F32(_) => cat!(F32),
            HostData::F64(_) => cat!(F64),
            HostData::U8(_) => cat!(U8),
            HostData::I8(_) => cat!(I8),
            HostData::I32(_) => cat!(I32),
            HostData::I64(_) => cat!(I64),
            HostData::Bool(_) => cat!(Bool),
        };
        Ok((data, first_shape.with_dim(axis, dim)))
    }

    /// Elementwise sum, booleans are or-ed, integers wrap
    pub fn add(&self, other: &HostData) -> Result<HostData, StrataError> {
        if self.len() != other.len() {
            return Err(StrataError::shape_error(format!(
                "can not add {} and {} elements",
                self.len(),
                other.len()
            )));
        }
        macro_rules! zip {
            ($x: expr, $y: expr, $f: expr) => {
                $x.iter().zip($y).map(|(a, b)| $f(*a, *b)).collect()
            };
        }
        Ok(match (self, other) {
            (HostData::BF16(x), HostData::BF16(y)) => HostData::BF16(zip!(x, y, |a, b| a + b)),
            (HostData::F16(x), HostData::F16(y)) => HostData::F16(zip!(x, y, |a, b| a + b)),
            (HostData::F32(x), HostData::F32(y)) => HostData::F32(zip!(x, y, |a, b| a + b)),
            (HostData::F64(x), HostData::F64(y)) => HostData::F64(zip!(x, y, |a, b| a + b)),
            (HostData::U8(x), HostData::U8(y)) => HostData::U8(zip!(x, y, u8::wrapping_add)),
            (HostData::I8(x), HostData::I8(y)) => HostData::I8(zip!(x, y, i8::wrapping_add)),
            (HostData::I32(x), HostData::I32(y)) => HostData::I32(zip!(x, y, i32::wrapping_add)),
            (HostData::I64(x), HostData::I64(y)) => HostData::I64(zip!(x, y, i64::wrapping_add)),
            (HostData::Bool(x), HostData::Bool(y)) => HostData::Bool(zip!(x, y, |a: bool, b: bool| a | b)),
            _ => {
                return Err(StrataError::dtype_error(format!(
                    "can not add {} and {}",
                    self.dtype(),
                    other.dtype()
                )))
            }
        })
    }

    fn check_len(&self, shape: &Shape) -> Result<(), StrataError> {
        if self.len() == shape.numel() {
            Ok(())
        } else {
            Err(StrataError::shape_error(format!(
                "{} elements do not fit shape {shape}",
                self.len()
            )))
        }
    }
}
