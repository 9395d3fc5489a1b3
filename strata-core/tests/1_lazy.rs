use strata_core::attr::AttrMap;
use strata_core::backend::KernelBackend;
use strata_core::device::{Device, DeviceKind, Placement};
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_core::infer::TensorDesc;
use strata_core::interpreter::{LazyInterpreter, OpExprInterpreter};
use strata_core::op_expr::{Initializer, OpExpr};
use strata_core::sbp::{Distribute, Sbp};
use strata_core::shape::Shape;
use strata_core::tensor::Tensor;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn lazy_apply_builds_graph() -> Result<(), StrataError> {
    init();
    let interp = LazyInterpreter::new("train_job");
    let x = interp.input("x", TensorDesc::new([2, 3], DType::F32));
    let w = interp.input("w", TensorDesc::new([3, 4], DType::F32));
    let matmul = OpExpr::builder("matmul").op_name("fc").input("a").input("b").output("out").build()?;
    let relu = OpExpr::builder("relu").input("x").output("y").build()?;
    let y = interp.call(&matmul, &[x, w], &AttrMap::new())?;
    let z = interp.call(&relu, &y, &AttrMap::new())?;
    assert_eq!(z.len(), 1);
    assert!(z[0].is_lazy());
    assert!(!z[0].is_eager());
    assert_eq!(z[0].shape(), &Shape::from([2, 4]));
    assert_eq!(z[0].lbi().lbn(), "relu/out_0");
    assert_eq!(z[0].job_name(), "train_job");
    assert!(z[0].to_host().is_err());

    let graph = interp.graph();
    assert_eq!(graph.nodes().len(), 4);
    let fc = graph.node("fc").ok_or_else(|| StrataError::NotFound("fc".into()))?;
    assert_eq!(fc.inputs, ["x/out_0", "w/out_0"]);
    assert_eq!(fc.outputs, ["fc/out_0"]);
    assert_eq!(graph.blob_desc("fc/out_0"), Some(&TensorDesc::new([2, 4], DType::F32)));
    Ok(())
}

#[test]
fn lazy_never_allocates() -> Result<(), StrataError> {
    init();
    let cpu = strata_cpu::device();
    let interp = LazyInterpreter::new("job");
    let x = interp.input("x", TensorDesc::new([8], DType::F32));
    let ops = [
        OpExpr::builder("exp").input("x").output("y").build()?,
        OpExpr::builder("neg").input("x").output("y").build()?,
        OpExpr::builder("scalar_mul").input("x").output("y").attr("scalar", 2.0).build()?,
    ];
    let mut y = vec![x];
    for op in &ops {
        y = interp.call(op, &y, &AttrMap::new())?.into_vec();
        assert!(y.iter().all(Tensor::is_lazy));
    }
    assert_eq!(cpu.allocation_count(), 0);
    assert_eq!(cpu.live_buffers(), 0);
    Ok(())
}

#[test]
fn repeated_names_are_made_unique() -> Result<(), StrataError> {
    let interp = LazyInterpreter::new("job");
    let x = interp.input("x", TensorDesc::new(4, DType::F64));
    let relu = OpExpr::builder("relu").input("x").output("y").build()?;
    let a = interp.call(&relu, &[x], &AttrMap::new())?;
    let b = interp.call(&relu, &a, &AttrMap::new())?;
    assert_eq!(a[0].lbi().lbn(), "relu/out_0");
    assert_eq!(b[0].lbi().lbn(), "relu_1/out_0");
    Ok(())
}

#[test]
fn lazy_rejects_eager_inputs() -> Result<(), StrataError> {
    let backend: std::sync::Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 3, vec![1f32, 2., 3.])?;
    let relu = OpExpr::builder("relu").input("x").output("y").build()?;
    let interp = LazyInterpreter::new("job");
    assert!(matches!(interp.call(&relu, &[x], &AttrMap::new()), Err(StrataError::InterpretError(_))));
    Ok(())
}

#[test]
fn lazy_arity_is_checked() -> Result<(), StrataError> {
    let interp = LazyInterpreter::new("job");
    let x = interp.input("x", TensorDesc::new(4, DType::F32));
    let add = OpExpr::builder("add").input("x").input("y").output("z").build()?;
    assert!(matches!(
        interp.call(&add, &[x], &AttrMap::new()),
        Err(StrataError::ArityMismatch { expected: 2, found: 1, .. })
    ));
    Ok(())
}

#[test]
fn lazy_consistent_variable() -> Result<(), StrataError> {
    init();
    let placement = Placement::new(DeviceKind::CPU, [0, 1])?;
    let interp = LazyInterpreter::consistent("job", placement.clone());
    let w = OpExpr::variable("w", [5, 2], DType::F32, Initializer::Zeros, Sbp::Split(0));
    let w = interp.call(&w, &[], &AttrMap::new())?;
    assert!(w[0].is_consistent());
    assert_eq!(w[0].placement(), &placement);
    assert_eq!(w[0].distribute(), Distribute::Split(0));

    let to_local = OpExpr::cast_to_mirrored("to_local", 2);
    let parts = interp.call(&to_local, &w, &AttrMap::new())?;
    assert_eq!(parts[0].shape(), &Shape::from([3, 2]));
    assert_eq!(parts[1].shape(), &Shape::from([2, 2]));
    assert_eq!(parts[1].device(), Device::cpu(1));
    assert!(parts.iter().all(|x| x.is_lazy() && !x.is_consistent()));
    Ok(())
}
