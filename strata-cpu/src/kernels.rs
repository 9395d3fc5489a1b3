use half::{bf16, f16};
#[cfg(feature = "std")]
use rayon::prelude::*;
use std::sync::Arc;
use strata_core::backend::KernelContext;
use strata_core::error::StrataError;
use strata_core::host::HostData;
use strata_core::infer::{normalize_axes, TensorDesc};
use strata_core::shape::Shape;

/// Arithmetic on host elements. Integers wrap, half types compute in f32.
trait Num: Copy + Send + Sync + PartialOrd {
    const ZERO: Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn neg(self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(x: f64) -> Self;
}

macro_rules! float_num {
    ($t: ty) => {
        impl Num for $t {
            const ZERO: Self = 0.0;
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn neg(self) -> Self {
                -self
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $t
            }
        }
    };
}

macro_rules! half_num {
    ($t: ty) => {
        impl Num for $t {
            const ZERO: Self = <$t>::ZERO;
            fn add(self, rhs: Self) -> Self {
                <$t>::from_f32(self.to_f32() + rhs.to_f32())
            }
            fn sub(self, rhs: Self) -> Self {
                <$t>::from_f32(self.to_f32() - rhs.to_f32())
            }
            fn mul(self, rhs: Self) -> Self {
                <$t>::from_f32(self.to_f32() * rhs.to_f32())
            }
            fn neg(self) -> Self {
                <$t>::from_f32(-self.to_f32())
            }
            fn to_f64(self) -> f64 {
                <$t>::to_f64(self)
            }
            fn from_f64(x: f64) -> Self {
                <$t>::from_f64(x)
            }
        }
    };
}

macro_rules! int_num {
    ($t: ty) => {
        impl Num for $t {
            const ZERO: Self = 0;
            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(x: f64) -> Self {
                x as $t
            }
        }
    };
}

float_num!(f32);
float_num!(f64);
half_num!(bf16);
half_num!(f16);
int_num!(u8);
int_num!(i8);
int_num!(i32);
int_num!(i64);

/// Applies generic expression to numeric data, bool is rejected
macro_rules! numeric {
    ($op_type: expr, $data: expr, $v: ident => $e: expr) => {
        match $data {
            HostData::BF16($v) => HostData::BF16($e),
            HostData::F16($v) => HostData::F16($e),
            HostData::F32($v) => HostData::F32($e),
            HostData::F64($v) => HostData::F64($e),
            HostData::U8($v) => HostData::U8($e),
            HostData::I8($v) => HostData::I8($e),
            HostData::I32($v) => HostData::I32($e),
            HostData::I64($v) => HostData::I64($e),
            HostData::Bool(_) => {
                return Err(StrataError::dtype_error(format!("{} is not defined for bool", $op_type)))
            }
        }
    };
}

/// Applies generic expression to two numeric buffers of the same dtype
macro_rules! numeric_binary {
    ($op_type: expr, $x: expr, $y: expr, ($a: ident, $b: ident) => $e: expr) => {
        match ($x, $y) {
            (HostData::BF16($a), HostData::BF16($b)) => HostData::BF16($e),
            (HostData::F16($a), HostData::F16($b)) => HostData::F16($e),
            (HostData::F32($a), HostData::F32($b)) => HostData::F32($e),
            (HostData::F64($a), HostData::F64($b)) => HostData::F64($e),
            (HostData::U8($a), HostData::U8($b)) => HostData::U8($e),
            (HostData::I8($a), HostData::I8($b)) => HostData::I8($e),
            (HostData::I32($a), HostData::I32($b)) => HostData::I32($e),
            (HostData::I64($a), HostData::I64($b)) => HostData::I64($e),
            (x, y) => {
                return Err(StrataError::dtype_error(format!(
                    "{} is not defined for {} and {}",
                    $op_type,
                    x.dtype(),
                    y.dtype()
                )))
            }
        }
    };
}

fn unary<T: Copy + Sync + Send, T2: Send>(data: &[T], op: impl Fn(T) -> T2 + Sync + Send) -> Vec<T2> {
    #[cfg(not(feature = "std"))]
    {
        data.iter().copied().map(op).collect()
    }
    #[cfg(feature = "std")]
    {
        data.par_iter().copied().map(op).collect()
    }
}

fn binary<T: Copy + Sync + Send>(x: &[T], y: &[T], op: impl Fn((T, T)) -> T + Sync + Send) -> Vec<T> {
    #[cfg(not(feature = "std"))]
    {
        x.iter().copied().zip(y.iter().copied()).map(op).collect()
    }
    #[cfg(feature = "std")]
    {
        x.par_iter().copied().zip(y.par_iter().copied()).map(op).collect()
    }
}

fn indexed<T: Send>(n: usize, op: impl Fn(usize) -> T + Sync + Send) -> Vec<T> {
    #[cfg(not(feature = "std"))]
    {
        (0..n).map(op).collect()
    }
    #[cfg(feature = "std")]
    {
        (0..n).into_par_iter().map(op).collect()
    }
}

fn matmul<T: Num>(a: &[T], b: &[T], (m, k, n): (usize, usize, usize), ta: bool, tb: bool) -> Vec<T> {
    indexed(m * n, |idx| {
        let (i, j) = (idx / n, idx % n);
        (0..k).fold(T::ZERO, |acc, p| {
            let x = if ta { a[p * m + i] } else { a[i * k + p] };
            let y = if tb { b[j * k + p] } else { b[p * n + j] };
            acc.add(x.mul(y))
        })
    })
}

fn strides(dims: &[usize]) -> Vec<usize> {
    let mut st = vec![1; dims.len()];
    for a in (0..dims.len().saturating_sub(1)).rev() {
        st[a] = st[a + 1] * dims[a + 1];
    }
    st
}

/// Index into the reduced buffer of element idx of the full buffer
fn reduced_index(idx: usize, dims: &[usize], st: &[usize], reduced_st: &[usize], axes: &[usize]) -> usize {
    let mut res = 0;
    for (a, d) in dims.iter().enumerate() {
        if !axes.contains(&a) {
            res += (idx / st[a]) % d * reduced_st[a];
        }
    }
    res
}

fn reduce_sum<T: Num>(x: &[T], shape: &Shape, axes: &[usize]) -> Vec<T> {
    let dims = shape.dims();
    let st = strides(dims);
    let reduced = shape.reduce(axes, true);
    let reduced_st = strides(reduced.dims());
    let mut res = vec![T::ZERO; reduced.numel()];
    for (idx, v) in x.iter().enumerate() {
        let r = reduced_index(idx, dims, &st, &reduced_st, axes);
        res[r] = res[r].add(*v);
    }
    res
}

fn broadcast_like<T: Num>(x: &[T], like: &Shape, axes: &[usize]) -> Vec<T> {
    let dims = like.dims();
    let st = strides(dims);
    let reduced_st = strides(like.reduce(axes, true).dims());
    indexed(like.numel(), |idx| x[reduced_index(idx, dims, &st, &reduced_st, axes)])
}

fn relu<T: Num>(x: &[T]) -> Vec<T> {
    unary(x, |v| if v > T::ZERO { v } else { T::ZERO })
}

fn relu_grad<T: Num>(dy: &[T], y: &[T]) -> Vec<T> {
    binary(dy, y, |(g, v)| if v > T::ZERO { g } else { T::ZERO })
}

fn scalar_mul<T: Num>(x: &[T], scalar: f64) -> Vec<T> {
    unary(x, |v| T::from_f64(v.to_f64() * scalar))
}

fn dropout<T: Num>(x: &[T], mask: &[i8], scale: f64) -> Vec<T> {
    x.iter().zip(mask).map(|(v, m)| if *m == 0 { T::ZERO } else { T::from_f64(v.to_f64() * scale) }).collect()
}

fn single(op_type: &str, args: &[(&TensorDesc, Arc<HostData>)], n: usize) -> Result<(), StrataError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(StrataError::arity(op_type, n, args.len()))
    }
}

/// Runs operator type on host data, outputs in operator output order
pub(crate) fn run(
    op_type: &str,
    ctx: &KernelContext<'_>,
    args: &[(&TensorDesc, Arc<HostData>)],
    outputs: &[TensorDesc],
) -> Result<Vec<HostData>, StrataError> {
    log::trace!("CPU kernel {op_type} {:?} -> {outputs:?}", args.iter().map(|(d, _)| *d).collect::<Vec<_>>());
    let res = match op_type {
        "identity" => {
            single(op_type, args, 1)?;
            args[0].1.as_ref().clone()
        }
        "neg" => {
            single(op_type, args, 1)?;
            numeric!(op_type, args[0].1.as_ref(), x => unary(x, Num::neg))
        }
        "relu" => {
            single(op_type, args, 1)?;
            numeric!(op_type, args[0].1.as_ref(), x => relu(x))
        }
        "exp" => {
            single(op_type, args, 1)?;
            numeric!(op_type, args[0].1.as_ref(), x => unary(x, |v| Num::from_f64(v.to_f64().exp())))
        }
        "scalar_mul" => {
            single(op_type, args, 1)?;
            let scalar: f64 = ctx.attrs.get("scalar")?;
            numeric!(op_type, args[0].1.as_ref(), x => scalar_mul(x, scalar))
        }
        "cast" => {
            single(op_type, args, 1)?;
            let dtype = outputs.first().map_or_else(|| args[0].1.dtype(), |d| d.dtype);
            args[0].1.cast(dtype)
        }
        "ones_like" => {
            single(op_type, args, 1)?;
            HostData::ones(args[0].1.dtype(), args[0].1.len())
        }
        "zeros_like" => {
            single(op_type, args, 1)?;
            HostData::zeros(args[0].1.dtype(), args[0].1.len())
        }
        "add" => {
            single(op_type, args, 2)?;
            numeric_binary!(op_type, args[0].1.as_ref(), args[1].1.as_ref(), (x, y) => binary(x, y, |(a, b)| a.add(b)))
        }
        "sub" => {
            single(op_type, args, 2)?;
            numeric_binary!(op_type, args[0].1.as_ref(), args[1].1.as_ref(), (x, y) => binary(x, y, |(a, b)| a.sub(b)))
        }
        "mul" => {
            single(op_type, args, 2)?;
            numeric_binary!(op_type, args[0].1.as_ref(), args[1].1.as_ref(), (x, y) => binary(x, y, |(a, b)| a.mul(b)))
        }
        "relu_grad" => {
            single(op_type, args, 2)?;
            numeric_binary!(op_type, args[0].1.as_ref(), args[1].1.as_ref(), (dy, y) => relu_grad(dy, y))
        }
        "matmul" => {
            single(op_type, args, 2)?;
            let ta = ctx.attrs.get_or("transpose_a", false)?;
            let tb = ctx.attrs.get_or("transpose_b", false)?;
            let a = &args[0].0.shape;
            let k = if ta { a.dim(0)? } else { a.dim(1)? };
            let (m, n) = match outputs.first() {
                Some(out) => (out.shape.dim(0)?, out.shape.dim(1)?),
                None => return Err(StrataError::arity(op_type, 1, 0)),
            };
            numeric_binary!(op_type, args[0].1.as_ref(), args[1].1.as_ref(), (x, y) => matmul(x, y, (m, k, n), ta, tb))
        }
        "reduce_sum" => {
            single(op_type, args, 1)?;
            let shape = &args[0].0.shape;
            let axes = normalize_axes(&ctx.attrs.get::<Vec<i64>>("axes")?, shape.rank())?;
            numeric!(op_type, args[0].1.as_ref(), x => reduce_sum(x, shape, &axes))
        }
        "broadcast_like" => {
            single(op_type, args, 2)?;
            let like = &args[1].0.shape;
            let axes = normalize_axes(&ctx.attrs.get::<Vec<i64>>("axes")?, like.rank())?;
            numeric!(op_type, args[0].1.as_ref(), x => broadcast_like(x, like, &axes))
        }
        "dropout" => {
            single(op_type, args, 1)?;
            let rate: f32 = ctx.attrs.get("rate")?;
            let x = args[0].1.as_ref();
            let mask = ctx.mask_generator().generate(x.len(), rate);
            let scale = if rate < 1.0 { 1.0 / (1.0 - f64::from(rate)) } else { 0.0 };
            let out = numeric!(op_type, x, x => dropout(x, &mask, scale));
            return Ok(vec![out, HostData::I8(mask)]);
        }
        _ => return Err(StrataError::NotFound(format!("cpu kernel of operator {op_type:?}").into())),
    };
    Ok(vec![res])
}
