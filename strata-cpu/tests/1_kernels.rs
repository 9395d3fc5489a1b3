use std::sync::Arc;
use strata_core::attr::{AttrMap, AttrValue};
use strata_core::backend::{KernelBackend, KernelContext};
use strata_core::device::Device;
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_core::host::HostData;
use strata_core::infer::TensorDesc;
use strata_core::interpreter::{EagerInterpreter, OpExprInterpreter};
use strata_core::op_expr::OpExpr;
use strata_core::rng::default_generator;
use strata_core::shape::Shape;
use strata_core::tensor::Tensor;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unary(op_type: &str) -> Result<OpExpr, StrataError> {
    OpExpr::builder(op_type).input("x").output("y").build()
}

fn binary(op_type: &str) -> Result<OpExpr, StrataError> {
    OpExpr::builder(op_type).input("x").input("y").output("z").build()
}

#[test]
fn bool_arithmetic_is_rejected() -> Result<(), StrataError> {
    init();
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![true, false])?;
    let interp = EagerInterpreter::mirrored(backend);
    assert!(matches!(interp.call(&binary("add")?, &[x.clone(), x.clone()], &AttrMap::new()), Err(StrataError::DTypeError(_))));
    assert!(matches!(interp.call(&unary("neg")?, &[x.clone()], &AttrMap::new()), Err(StrataError::DTypeError(_))));
    // Data movement kernels accept bool
    assert_eq!(interp.call(&unary("identity")?, &[x], &AttrMap::new())?[0].to_vec::<bool>()?, [true, false]);
    Ok(())
}

#[test]
fn cast() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 3, vec![1.7f32, -2.2, 0.0])?;
    let interp = EagerInterpreter::mirrored(backend);
    let to_i32 = OpExpr::builder("cast").input("x").output("y").attr("dtype", DType::I32).build()?;
    let y = interp.call(&to_i32, &[x.clone()], &AttrMap::new())?;
    assert_eq!(y[0].dtype(), DType::I32);
    assert_eq!(y[0].to_vec::<i32>()?, [1, -2, 0]);
    let attrs = AttrMap::from([("dtype", AttrValue::DType(DType::Bool))]);
    assert_eq!(interp.call(&to_i32, &[x], &attrs)?[0].to_vec::<bool>()?, [true, true, false]);
    Ok(())
}

#[test]
fn reduce_and_broadcast() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), [2, 3], vec![1i64, 2, 3, 4, 5, 6])?;
    let interp = EagerInterpreter::mirrored(backend);
    let reduce = OpExpr::builder("reduce_sum").input("x").output("y").attr("axes", vec![-1i64]).build()?;
    let kept = interp.call(&reduce, &[x.clone()], &AttrMap::from([("keepdims", true)]))?;
    assert_eq!(kept[0].shape(), &Shape::from([2, 1]));
    assert_eq!(kept[0].to_vec::<i64>()?, [6, 15]);
    let dropped = interp.call(&reduce, &[x.clone()], &AttrMap::new())?;
    assert_eq!(dropped[0].shape(), &Shape::from(2));

    let broadcast = OpExpr::builder("broadcast_like").input("x").input("like").output("y").attr("axes", vec![1i64]).build()?;
    let y = interp.call(&broadcast, &[dropped[0].clone(), x], &AttrMap::new())?;
    assert_eq!(y[0].to_vec::<i64>()?, [6, 6, 6, 15, 15, 15]);
    Ok(())
}

#[test]
fn exp_needs_floats() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![0f64, 1.])?;
    let i = Tensor::from_host(&backend, Device::cpu(0), 2, vec![0i32, 1])?;
    let interp = EagerInterpreter::mirrored(backend);
    let y = interp.call(&unary("exp")?, &[x], &AttrMap::new())?[0].to_vec::<f64>()?;
    assert_eq!(y[0], 1.);
    assert!((y[1] - std::f64::consts::E).abs() < 1e-12);
    assert!(matches!(interp.call(&unary("exp")?, &[i], &AttrMap::new()), Err(StrataError::DTypeError(_))));
    Ok(())
}

#[test]
fn integers_wrap() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 3, vec![127i8, -128, 5])?;
    let y = Tensor::from_host(&backend, Device::cpu(0), 3, vec![1i8, -1, 5])?;
    let interp = EagerInterpreter::mirrored(backend);
    assert_eq!(interp.call(&binary("add")?, &[x.clone(), y.clone()], &AttrMap::new())?[0].to_vec::<i8>()?, [-128, 127, 10]);
    assert_eq!(interp.call(&binary("mul")?, &[x, y], &AttrMap::new())?[0].to_vec::<i8>()?, [127, -128, 25]);
    Ok(())
}

#[test]
fn half_precision() -> Result<(), StrataError> {
    use half::f16;
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![f16::from_f32(1.5), f16::from_f32(-2.0)])?;
    let interp = EagerInterpreter::mirrored(backend);
    let y = interp.call(&unary("relu")?, &[x.clone()], &AttrMap::new())?;
    assert_eq!(y[0].to_vec::<f16>()?, [f16::from_f32(1.5), f16::ZERO]);
    let z = interp.call(&binary("sub")?, &[x.clone(), x], &AttrMap::new())?;
    assert_eq!(z[0].to_vec::<f16>()?, [f16::ZERO, f16::ZERO]);
    Ok(())
}

#[test]
fn devices_are_checked() -> Result<(), StrataError> {
    init();
    let cpu = strata_cpu::devices(3);
    let backend: Arc<dyn KernelBackend> = cpu.clone();
    assert_eq!(backend.name(), "cpu");
    let id = backend.store(Device::cpu(2), HostData::from(vec![1f32, 2.]))?;
    assert!(matches!(backend.store(Device::cpu(3), HostData::from(vec![1f32])), Err(StrataError::DeviceError(_))));

    let desc = TensorDesc::new(2, DType::F32);
    let attrs = AttrMap::new();
    let generator = default_generator();
    let ctx = KernelContext { attrs: &attrs, state: None, generator: &generator };
    let out = backend.compute("neg", &ctx, Device::cpu(2), &[(&desc, id)], &[desc.clone()])?;
    assert_eq!(backend.load(out[0])?, HostData::from(vec![-1f32, -2.]));
    assert!(matches!(
        backend.compute("neg", &ctx, Device::cpu(1), &[(&desc, id)], &[desc.clone()]),
        Err(StrataError::DeviceError(_))
    ));
    assert!(matches!(
        backend.compute("gelu", &ctx, Device::cpu(2), &[(&desc, id)], &[desc.clone()]),
        Err(StrataError::NotFound(_))
    ));

    assert_eq!(cpu.live_buffers(), 2);
    backend.release(id);
    backend.release(out[0]);
    assert_eq!(cpu.live_buffers(), 0);
    assert!(matches!(backend.load(id), Err(StrataError::NotFound(_))));
    Ok(())
}
