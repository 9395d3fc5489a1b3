//! Operator attributes.

use crate::dtype::DType;
use crate::error::StrataError;
use crate::shape::Shape;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 32 bit integer
    I32(i32),
    /// 64 bit integer
    I64(i64),
    /// 32 bit float
    F32(f32),
    /// 64 bit float
    F64(f64),
    /// Boolean
    Bool(bool),
    /// String
    Str(Box<str>),
    /// Shape
    Shape(Shape),
    /// DType
    DType(DType),
    /// List of 64 bit integers
    ListI64(Vec<i64>),
}

/// Conversion from [`AttrValue`] used by typed getters
pub trait FromAttr: Sized {
    /// Name of type shown in errors
    const NAME: &'static str;
    /// Converts value, None if variant does not fit
    fn from_attr(value: &AttrValue) -> Option<Self>;
}

macro_rules! from_attr {
    ($t: ty, $name: literal, $($pat: pat => $e: expr),+) => {
        impl FromAttr for $t {
            const NAME: &'static str = $name;
            fn from_attr(value: &AttrValue) -> Option<Self> {
                match value {
                    $($pat => Some($e),)+
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

from_attr!(i32, "i32", AttrValue::I32(x) => *x);
from_attr!(i64, "i64", AttrValue::I64(x) => *x, AttrValue::I32(x) => i64::from(*x));
from_attr!(f32, "f32", AttrValue::F32(x) => *x);
from_attr!(f64, "f64", AttrValue::F64(x) => *x, AttrValue::F32(x) => f64::from(*x));
from_attr!(bool, "bool", AttrValue::Bool(x) => *x);
from_attr!(String, "string", AttrValue::Str(x) => x.to_string());
from_attr!(Shape, "shape", AttrValue::Shape(x) => x.clone());
from_attr!(DType, "dtype", AttrValue::DType(x) => *x);
from_attr!(Vec<i64>, "list of i64", AttrValue::ListI64(x) => x.clone());

macro_rules! into_attr {
    ($t: ty, $v: ident, $e: expr) => {
        impl From<$t> for AttrValue {
            fn from($v: $t) -> Self {
                $e
            }
        }
    };
}

into_attr!(i32, x, AttrValue::I32(x));
into_attr!(i64, x, AttrValue::I64(x));
into_attr!(f32, x, AttrValue::F32(x));
into_attr!(f64, x, AttrValue::F64(x));
into_attr!(bool, x, AttrValue::Bool(x));
into_attr!(&str, x, AttrValue::Str(x.into()));
into_attr!(Shape, x, AttrValue::Shape(x));
into_attr!(DType, x, AttrValue::DType(x));
into_attr!(Vec<i64>, x, AttrValue::ListI64(x));

/// Immutable map from attribute name to value. Cloning is cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrMap(Arc<BTreeMap<Box<str>, AttrValue>>);

impl AttrMap {
    /// Empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    /// Does the map contain attribute
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Typed value, error if missing or of a different type
    pub fn get<T: FromAttr>(&self, name: &str) -> Result<T, StrataError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| StrataError::NotFound(format!("attribute {name:?}").into()))?;
        T::from_attr(value).ok_or_else(|| {
            StrataError::interpret_error(format!("attribute {name:?} = {value:?} is not {}", T::NAME))
        })
    }

    /// Typed value or default if missing, error if of a different type
    pub fn get_or<T: FromAttr>(&self, name: &str, default: T) -> Result<T, StrataError> {
        if self.contains(name) {
            self.get(name)
        } else {
            Ok(default)
        }
    }

    /// New map with entries of other overriding entries of self
    #[must_use]
    pub fn merged(&self, other: &AttrMap) -> AttrMap {
        if other.0.is_empty() {
            return self.clone();
        }
        if self.0.is_empty() {
            return other.clone();
        }
        let mut map = (*self.0).clone();
        map.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        AttrMap(Arc::new(map))
    }

    /// Iterate over entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (&**k, v))
    }

    /// Is map empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<Box<str>>, V: Into<AttrValue>> FromIterator<(K, V)> for AttrMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        AttrMap(Arc::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect()))
    }
}

impl<K: Into<Box<str>>, V: Into<AttrValue>, const N: usize> From<[(K, V); N]> for AttrMap {
    fn from(value: [(K, V); N]) -> Self {
        value.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() -> Result<(), StrataError> {
        let attrs = AttrMap::from([("scalar", AttrValue::F32(2.0)), ("axes", AttrValue::ListI64(vec![0, 1]))]);
        assert_eq!(attrs.get::<f32>("scalar")?, 2.0);
        assert_eq!(attrs.get::<f64>("scalar")?, 2.0);
        assert_eq!(attrs.get::<Vec<i64>>("axes")?, vec![0, 1]);
        assert!(attrs.get::<bool>("scalar").is_err());
        assert!(!attrs.get_or("keepdims", false)?);
        Ok(())
    }

    #[test]
    fn merged_prefers_call_attrs() -> Result<(), StrataError> {
        let a = AttrMap::from([("x", 1i64), ("y", 2)]);
        let b = AttrMap::from([("y", 3i64)]);
        let m = a.merged(&b);
        assert_eq!(m.get::<i64>("x")?, 1);
        assert_eq!(m.get::<i64>("y")?, 3);
        Ok(())
    }
}
