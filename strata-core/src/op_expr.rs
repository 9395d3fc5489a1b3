//! Operator expressions.
//!
//! An [`OpExpr`] is an immutable description of one computation with declared
//! input and output arity. It is built once and then applied any number of
//! times by interpreters. Cloning is cheap.

use crate::attr::{AttrMap, AttrValue};
use crate::device::Placement;
use crate::dtype::DType;
use crate::error::StrataError;
use crate::sbp::Sbp;
use crate::shape::Shape;
use std::sync::Arc;

/// Dynamic kind of operator expression, the key of interpreter dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpExprKind {
    /// Builtin or registered user operator
    User,
    /// Model variable
    Variable,
    /// Consistent tensor into its mirrored components
    CastToMirrored,
    /// Mirrored components into one consistent tensor
    CastFromMirrored,
    /// One tensor into parts along axis, one part per device
    DistributeSplit,
    /// One tensor copied to every device
    DistributeClone,
    /// Many tensors concatenated along axis
    DistributeConcat,
    /// Many tensors summed
    DistributeAdd,
    /// Declared sub graph
    Function,
}

impl OpExprKind {
    /// Snake case name, used as operator type of non user operators
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpExprKind::User => "user",
            OpExprKind::Variable => "variable",
            OpExprKind::CastToMirrored => "cast_to_mirrored",
            OpExprKind::CastFromMirrored => "cast_from_mirrored",
            OpExprKind::DistributeSplit => "distribute_split",
            OpExprKind::DistributeClone => "distribute_clone",
            OpExprKind::DistributeConcat => "distribute_concat",
            OpExprKind::DistributeAdd => "distribute_add",
            OpExprKind::Function => "function",
        }
    }
}

/// Initial value of variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    /// All zeros
    Zeros,
    /// All ones
    Ones,
    /// Every element equal to value
    Constant(f64),
    /// Uniform distribution in low..high
    Uniform {
        /// Lower bound
        low: f64,
        /// Upper bound
        high: f64,
    },
    /// Normal distribution
    Normal {
        /// Mean
        mean: f64,
        /// Standard deviation
        std: f64,
    },
}

/// Operator implemented by a kernel
#[derive(Debug)]
pub struct UserOpExpr {
    /// Operator type, key into kernel, inference and sbp registries
    pub op_type: Box<str>,
    /// Names of inputs
    pub input_arg_names: Vec<Box<str>>,
    /// Names of outputs
    pub output_arg_names: Vec<Box<str>>,
}

/// Model variable
#[derive(Debug)]
pub struct VariableOpExpr {
    /// Shape
    pub shape: Shape,
    /// DType
    pub dtype: DType,
    /// How the value is initialized
    pub initializer: Initializer,
    /// Layout of the variable over a placement
    pub sbp: Sbp,
}

/// One step of a function
#[derive(Debug, Clone)]
pub struct FunctionStep {
    /// Applied operator
    pub op: OpExpr,
    /// Call attributes
    pub attrs: AttrMap,
    /// Value refs of inputs
    pub inputs: Vec<usize>,
}

/// Sub graph of operators.
///
/// Values `0..num_inputs` are the function inputs, every step appends its
/// outputs to the list of values.
#[derive(Debug)]
pub struct FunctionOpExpr {
    /// Number of function inputs
    pub num_inputs: usize,
    /// Steps in execution order
    pub steps: Vec<FunctionStep>,
    /// Value refs of outputs
    pub outputs: Vec<usize>,
}

/// Body of operator expression
#[derive(Debug)]
pub enum OpBody {
    /// See [`UserOpExpr`]
    User(UserOpExpr),
    /// See [`VariableOpExpr`]
    Variable(VariableOpExpr),
    /// Consistent tensor into num_outputs mirrored tensors
    CastToMirrored {
        /// Declared number of components
        num_outputs: usize,
    },
    /// num_inputs mirrored tensors into consistent tensor laid out as sbp
    CastFromMirrored {
        /// Declared number of components
        num_inputs: usize,
        /// Layout of components
        sbp: Sbp,
    },
    /// Split along axis over placement
    DistributeSplit {
        /// Split axis
        axis: usize,
        /// Target devices
        placement: Placement,
    },
    /// Copy to every device of placement
    DistributeClone {
        /// Target devices
        placement: Placement,
    },
    /// Concat num_inputs tensors along axis
    DistributeConcat {
        /// Concat axis
        axis: usize,
        /// Number of inputs
        num_inputs: usize,
    },
    /// Sum num_inputs tensors
    DistributeAdd {
        /// Number of inputs
        num_inputs: usize,
    },
    /// See [`FunctionOpExpr`]
    Function(FunctionOpExpr),
}

#[derive(Debug)]
struct OpExprDef {
    op_name: Box<str>,
    attrs: AttrMap,
    body: OpBody,
}

/// Immutable shared operator expression
#[derive(Debug, Clone)]
pub struct OpExpr(Arc<OpExprDef>);

impl OpExpr {
    fn new(op_name: &str, attrs: AttrMap, body: OpBody) -> OpExpr {
        OpExpr(Arc::new(OpExprDef { op_name: op_name.into(), attrs, body }))
    }

    /// Builder of user operator
    #[must_use]
    pub fn builder(op_type: &str) -> UserOpExprBuilder {
        UserOpExprBuilder {
            op_name: None,
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// Variable operator
    #[must_use]
    pub fn variable(op_name: &str, shape: impl Into<Shape>, dtype: DType, initializer: Initializer, sbp: Sbp) -> OpExpr {
        OpExpr::new(
            op_name,
            AttrMap::new(),
            OpBody::Variable(VariableOpExpr { shape: shape.into(), dtype, initializer, sbp }),
        )
    }

    /// Cast of consistent tensor into num_outputs mirrored tensors
    #[must_use]
    pub fn cast_to_mirrored(op_name: &str, num_outputs: usize) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::CastToMirrored { num_outputs })
    }

    /// Cast of num_inputs mirrored tensors into consistent tensor laid out as sbp
    #[must_use]
    pub fn cast_from_mirrored(op_name: &str, num_inputs: usize, sbp: Sbp) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::CastFromMirrored { num_inputs, sbp })
    }

    /// Split along axis over devices of placement
    #[must_use]
    pub fn distribute_split(op_name: &str, axis: usize, placement: Placement) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::DistributeSplit { axis, placement })
    }

    /// Copy to every device of placement
    #[must_use]
    pub fn distribute_clone(op_name: &str, placement: Placement) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::DistributeClone { placement })
    }

    /// Concat of num_inputs tensors along axis
    #[must_use]
    pub fn distribute_concat(op_name: &str, axis: usize, num_inputs: usize) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::DistributeConcat { axis, num_inputs })
    }

    /// Sum of num_inputs tensors
    #[must_use]
    pub fn distribute_add(op_name: &str, num_inputs: usize) -> OpExpr {
        OpExpr::new(op_name, AttrMap::new(), OpBody::DistributeAdd { num_inputs })
    }

    /// Function over num_inputs values. Every step may only refer to function
    /// inputs or to outputs of earlier steps and must match arity of its operator.
    pub fn function(
        op_name: &str,
        num_inputs: usize,
        steps: Vec<FunctionStep>,
        outputs: Vec<usize>,
    ) -> Result<OpExpr, StrataError> {
        let mut defined = num_inputs;
        for (i, step) in steps.iter().enumerate() {
            if step.inputs.len() != step.op.input_arity() {
                return Err(StrataError::arity(step.op.op_name(), step.op.input_arity(), step.inputs.len()));
            }
            if let Some(r) = step.inputs.iter().find(|r| **r >= defined) {
                return Err(StrataError::interpret_error(format!(
                    "step {i} of function {op_name} refers to undefined value {r}"
                )));
            }
            defined += step.op.output_arity();
        }
        if let Some(r) = outputs.iter().find(|r| **r >= defined) {
            return Err(StrataError::interpret_error(format!(
                "output of function {op_name} refers to undefined value {r}"
            )));
        }
        Ok(OpExpr::new(op_name, AttrMap::new(), OpBody::Function(FunctionOpExpr { num_inputs, steps, outputs })))
    }

    /// Name of operator instance
    #[must_use]
    pub fn op_name(&self) -> &str {
        &self.0.op_name
    }

    /// Operator type, the kind name for non user operators
    #[must_use]
    pub fn op_type(&self) -> &str {
        match &self.0.body {
            OpBody::User(user) => &user.op_type,
            _ => self.kind().name(),
        }
    }

    /// Static attributes
    #[must_use]
    pub fn attrs(&self) -> &AttrMap {
        &self.0.attrs
    }

    /// Body of operator
    #[must_use]
    pub fn body(&self) -> &OpBody {
        &self.0.body
    }

    /// Dynamic kind
    #[must_use]
    pub fn kind(&self) -> OpExprKind {
        match &self.0.body {
            OpBody::User(_) => OpExprKind::User,
            OpBody::Variable(_) => OpExprKind::Variable,
            OpBody::CastToMirrored { .. } => OpExprKind::CastToMirrored,
            OpBody::CastFromMirrored { .. } => OpExprKind::CastFromMirrored,
            OpBody::DistributeSplit { .. } => OpExprKind::DistributeSplit,
            OpBody::DistributeClone { .. } => OpExprKind::DistributeClone,
            OpBody::DistributeConcat { .. } => OpExprKind::DistributeConcat,
            OpBody::DistributeAdd { .. } => OpExprKind::DistributeAdd,
            OpBody::Function(_) => OpExprKind::Function,
        }
    }

    /// Declared number of inputs
    #[must_use]
    pub fn input_arity(&self) -> usize {
        match &self.0.body {
            OpBody::User(user) => user.input_arg_names.len(),
            OpBody::Variable(_) => 0,
            OpBody::CastToMirrored { .. } | OpBody::DistributeSplit { .. } | OpBody::DistributeClone { .. } => 1,
            OpBody::CastFromMirrored { num_inputs, .. }
            | OpBody::DistributeConcat { num_inputs, .. }
            | OpBody::DistributeAdd { num_inputs } => *num_inputs,
            OpBody::Function(f) => f.num_inputs,
        }
    }

    /// Declared number of outputs
    #[must_use]
    pub fn output_arity(&self) -> usize {
        match &self.0.body {
            OpBody::User(user) => user.output_arg_names.len(),
            OpBody::CastToMirrored { num_outputs } => *num_outputs,
            OpBody::DistributeSplit { placement, .. } | OpBody::DistributeClone { placement } => {
                placement.parallel_num()
            }
            OpBody::Variable(_)
            | OpBody::CastFromMirrored { .. }
            | OpBody::DistributeConcat { .. }
            | OpBody::DistributeAdd { .. } => 1,
            OpBody::Function(f) => f.outputs.len(),
        }
    }

    /// Blob name of input i, `x_0` for user argument x, `in_i` otherwise
    #[must_use]
    pub fn indexed_ibn(&self, i: usize) -> String {
        match &self.0.body {
            OpBody::User(user) => format!("{}_0", user.input_arg_names[i]),
            _ => format!("in_{i}"),
        }
    }

    /// Blob name of output i, `y_0` for user argument y, `out_i` otherwise
    #[must_use]
    pub fn indexed_obn(&self, i: usize) -> String {
        match &self.0.body {
            OpBody::User(user) => format!("{}_0", user.output_arg_names[i]),
            _ => format!("out_{i}"),
        }
    }

    /// Same expression object
    #[must_use]
    pub fn same_as(&self, other: &OpExpr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Builder of user operator expression
#[derive(Debug, Clone)]
pub struct UserOpExprBuilder {
    op_name: Option<Box<str>>,
    op_type: Box<str>,
    inputs: Vec<Box<str>>,
    outputs: Vec<Box<str>>,
    attrs: Vec<(Box<str>, AttrValue)>,
}

impl UserOpExprBuilder {
    /// Name of operator instance, defaults to op type
    #[must_use]
    pub fn op_name(mut self, op_name: &str) -> Self {
        self.op_name = Some(op_name.into());
        self
    }

    /// Append input argument
    #[must_use]
    pub fn input(mut self, name: &str) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Append output argument
    #[must_use]
    pub fn output(mut self, name: &str) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Static attribute
    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Finish, argument names must be unique and there must be at least one output
    pub fn build(self) -> Result<OpExpr, StrataError> {
        if self.outputs.is_empty() {
            return Err(StrataError::interpret_error(format!("operator {} has no outputs", self.op_type)));
        }
        for names in [&self.inputs, &self.outputs] {
            for (i, name) in names.iter().enumerate() {
                if names[..i].contains(name) {
                    return Err(StrataError::interpret_error(format!(
                        "argument {name} of operator {} is declared twice",
                        self.op_type
                    )));
                }
            }
        }
        let op_name = self.op_name.unwrap_or_else(|| self.op_type.clone());
        Ok(OpExpr::new(
            &op_name,
            self.attrs.into_iter().collect(),
            OpBody::User(UserOpExpr {
                op_type: self.op_type,
                input_arg_names: self.inputs,
                output_arg_names: self.outputs,
            }),
        ))
    }
}
