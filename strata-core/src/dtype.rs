use crate::error::StrataError;

/// DType of tensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    /// 16 bit bfloat type
    BF16,
    /// 16 bit floating point type
    F16,
    /// 32 bit floating point type
    F32,
    /// 64 bit floating point type
    F64,
    /// 8 bit unsigned integer type
    U8,
    /// 8 bit integer type
    I8,
    /// 32 bit integer type
    I32,
    /// 64 bit integer type
    I64,
    /// Boolean type
    Bool,
}

impl DType {
    /// Get the size of DType in bytes
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::BF16 | Self::F16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    /// Check if self is floating point dtype
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::BF16 | Self::F16 | Self::F32 | Self::F64)
    }

    /// Short lowercase name, the same spelling accepted by [`DType::from_str`](std::str::FromStr)
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BF16 => "bf16",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
        }
    }
}

impl std::str::FromStr for DType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bf16" | "bfloat16" => Self::BF16,
            "f16" | "float16" | "half" => Self::F16,
            "f32" | "float32" | "float" => Self::F32,
            "f64" | "float64" | "double" => Self::F64,
            "u8" | "uint8" => Self::U8,
            "i8" | "int8" => Self::I8,
            "i32" | "int32" => Self::I32,
            "i64" | "int64" => Self::I64,
            "bool" => Self::Bool,
            _ => return Err(StrataError::parse_error(format!("Unknown dtype {s:?}"))),
        })
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
