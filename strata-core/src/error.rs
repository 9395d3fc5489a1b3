use std::fmt::Display;

/// Enumeration representing the various errors that can occur within strata.
#[derive(Debug)]
pub enum StrataError {
    /// Declared operator arity and supplied tensor tuple length disagree
    ArityMismatch {
        /// Operator name
        op: Box<str>,
        /// Declared arity
        expected: usize,
        /// Supplied number of tensors
        found: usize,
    },
    /// Invalid shapes for operation
    ShapeError(Box<str>),
    /// Wrong dtype for given operation
    DTypeError(Box<str>),
    /// Device or distribution of inputs is not compatible with the operation
    DeviceError(Box<str>),
    /// Operator could not be interpreted in the current mode
    InterpretError(Box<str>),
    /// A value that may be assigned only once was assigned twice
    DuplicateAssignment(Box<str>),
    /// Operator slots and bound registers or blobs do not line up
    RegisterBindingMismatch(Box<str>),
    /// Register is locked and its contract can no longer change
    RegisterLocked(Box<str>),
    /// Named entity does not exist
    NotFound(Box<str>),
    /// Error parsing some data
    ParseError(Box<str>),
    /// Error from file operations
    IOError(std::io::Error),
}

fn with_location(e: Box<str>, location: &std::panic::Location<'_>) -> Box<str> {
    format!("{e}, {}:{}:{}", location.file(), location.line(), location.column()).into()
}

impl StrataError {
    /// Arity error
    pub fn arity(op: &str, expected: usize, found: usize) -> Self {
        Self::ArityMismatch { op: op.into(), expected, found }
    }

    /// Shape error
    #[track_caller]
    pub fn shape_error(e: impl Into<Box<str>>) -> Self {
        Self::ShapeError(with_location(e.into(), std::panic::Location::caller()))
    }

    /// DType error
    #[track_caller]
    pub fn dtype_error(e: impl Into<Box<str>>) -> Self {
        Self::DTypeError(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Device error
    #[track_caller]
    pub fn device_error(e: impl Into<Box<str>>) -> Self {
        Self::DeviceError(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Interpret error
    #[track_caller]
    pub fn interpret_error(e: impl Into<Box<str>>) -> Self {
        Self::InterpretError(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Binding error
    #[track_caller]
    pub fn binding_error(e: impl Into<Box<str>>) -> Self {
        Self::RegisterBindingMismatch(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Duplicate assignment error
    #[track_caller]
    pub fn duplicate_assignment(e: impl Into<Box<str>>) -> Self {
        Self::DuplicateAssignment(with_location(e.into(), std::panic::Location::caller()))
    }

    /// Parse error
    #[track_caller]
    pub fn parse_error(e: impl Into<Box<str>>) -> Self {
        Self::ParseError(with_location(e.into(), std::panic::Location::caller()))
    }
}

impl Display for StrataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrataError::ArityMismatch { op, expected, found } => f.write_fmt(format_args!(
                "Arity mismatch: {op} declares {expected} tensors, but {found} were given"
            )),
            StrataError::ShapeError(e) => f.write_fmt(format_args!("Shape {e}")),
            StrataError::DTypeError(e) => f.write_fmt(format_args!("Wrong dtype {e}")),
            StrataError::DeviceError(e) => f.write_fmt(format_args!("Device {e}")),
            StrataError::InterpretError(e) => f.write_fmt(format_args!("Interpret {e}")),
            StrataError::DuplicateAssignment(e) => {
                f.write_fmt(format_args!("Duplicate assignment {e}"))
            }
            StrataError::RegisterBindingMismatch(e) => {
                f.write_fmt(format_args!("Register binding {e}"))
            }
            StrataError::RegisterLocked(e) => f.write_fmt(format_args!("Register {e} is locked")),
            StrataError::NotFound(e) => f.write_fmt(format_args!("Not found {e}")),
            StrataError::ParseError(e) => f.write_fmt(format_args!("Parse {e}")),
            StrataError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
        }
    }
}

impl std::error::Error for StrataError {}

impl From<std::io::Error> for StrataError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

/// Aborts on a tensor implementation asked for something it cannot provide.
/// This is a structural misuse, not a recoverable condition.
#[track_caller]
pub(crate) fn unimplemented_capability(capability: &str, kind: &str) -> ! {
    panic!("Unimplemented capability: {capability} is not available on {kind} tensors")
}
