use std::sync::Arc;
use strata_core::attr::AttrMap;
use strata_core::backend::KernelBackend;
use strata_core::device::{Device, DeviceKind, Placement};
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_core::interpreter::{EagerInterpreter, OpExprInterpreter};
use strata_core::op_expr::{Initializer, OpExpr};
use strata_core::sbp::Sbp;
use strata_core::shape::Shape;
use strata_core::tensor::Tensor;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn two_devices() -> Result<(Arc<dyn KernelBackend>, Placement), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::devices(2);
    Ok((backend, Placement::new(DeviceKind::CPU, [0, 1])?))
}

#[test]
fn single_device_matches_mirrored() -> Result<(), StrataError> {
    init();
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let placement = Placement::single(Device::cpu(0));
    let data = vec![-1f32, 2., -3., 4., 5., -6.];
    let relu = OpExpr::builder("relu").input("x").output("y").build()?;

    let x = Tensor::from_host(&backend, Device::cpu(0), [2, 3], data.clone())?;
    let mirrored = EagerInterpreter::mirrored(backend.clone()).call(&relu, &[x], &AttrMap::new())?;

    let x = Tensor::consistent_from_host(&backend, &placement, Sbp::Broadcast, [2, 3], data)?;
    let consistent = EagerInterpreter::consistent(backend, placement.clone()).call(&relu, &[x], &AttrMap::new())?;
    assert!(consistent[0].is_consistent());
    assert_eq!(consistent[0].placement(), &placement);
    assert_eq!(consistent[0].to_vec::<f32>()?, mirrored[0].to_vec::<f32>()?);
    Ok(())
}

#[test]
fn split_times_broadcast() -> Result<(), StrataError> {
    init();
    let (backend, placement) = two_devices()?;
    let a = Tensor::consistent_from_host(&backend, &placement, Sbp::Split(0), [2, 3], vec![1f32, 2., 3., 4., 5., 6.])?;
    let b = Tensor::consistent_from_host(&backend, &placement, Sbp::Broadcast, [3, 2], vec![1f32, 0., 0., 1., 1., 1.])?;
    let matmul = OpExpr::builder("matmul").input("a").input("b").output("out").build()?;
    let interp = EagerInterpreter::consistent(backend, placement);
    let y = interp.call(&matmul, &[a, b], &AttrMap::new())?;
    assert_eq!(y[0].sbp(), Sbp::Split(0));
    assert_eq!(y[0].shape(), &Shape::from([2, 2]));
    let parts = &y[0].consistent_blob().components;
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1].device(), Device::cpu(1));
    assert_eq!(parts[1].desc().shape, Shape::from([1, 2]));
    assert_eq!(y[0].to_vec::<f32>()?, [4., 5., 10., 11.]);
    Ok(())
}

#[test]
fn split_contraction_is_partial_sum() -> Result<(), StrataError> {
    let (backend, placement) = two_devices()?;
    let a = Tensor::consistent_from_host(
        &backend,
        &placement,
        Sbp::Split(1),
        [2, 4],
        vec![1f32, 2., 3., 4., 5., 6., 7., 8.],
    )?;
    let b = Tensor::consistent_from_host(
        &backend,
        &placement,
        Sbp::Split(0),
        [4, 2],
        vec![1f32, 0., 0., 1., 1., 0., 0., 1.],
    )?;
    let matmul = OpExpr::builder("matmul").input("a").input("b").output("out").build()?;
    let interp = EagerInterpreter::consistent(backend, placement);
    let y = interp.call(&matmul, &[a, b], &AttrMap::new())?;
    assert_eq!(y[0].sbp(), Sbp::PartialSum);
    // Device local products, [[1, 2], [5, 6]] and [[3, 4], [7, 8]]
    let parts = &y[0].consistent_blob().components;
    assert_eq!(parts[0].to_host()?.into_vec::<f32>()?, [1., 2., 5., 6.]);
    assert_eq!(parts[1].to_host()?.into_vec::<f32>()?, [3., 4., 7., 8.]);
    assert_eq!(y[0].to_vec::<f32>()?, [4., 6., 12., 14.]);
    Ok(())
}

#[test]
fn mismatched_inputs_are_boxed() -> Result<(), StrataError> {
    init();
    let (backend, placement) = two_devices()?;
    let x = Tensor::consistent_from_host(&backend, &placement, Sbp::Split(0), 4, vec![1i32, 2, 3, 4])?;
    let y = Tensor::consistent_from_host(&backend, &placement, Sbp::Broadcast, 4, vec![10i32, 20, 30, 40])?;
    let add = OpExpr::builder("add").input("x").input("y").output("z").build()?;
    let interp = EagerInterpreter::consistent(backend, placement);
    let z = interp.call(&add, &[x, y.clone()], &AttrMap::new())?;
    assert_eq!(z[0].sbp(), Sbp::Split(0));
    assert_eq!(z[0].to_vec::<i32>()?, [11, 22, 33, 44]);
    // Inputs keep their layout
    assert_eq!(y.sbp(), Sbp::Broadcast);
    Ok(())
}

#[test]
fn mixed_placements_are_rejected() -> Result<(), StrataError> {
    let (backend, placement) = two_devices()?;
    let x = Tensor::consistent_from_host(&backend, &placement, Sbp::Broadcast, 2, vec![1f32, 2.])?;
    let y = Tensor::consistent_from_host(&backend, &Placement::single(Device::cpu(1)), Sbp::Broadcast, 2, vec![1f32, 2.])?;
    let m = Tensor::from_host(&backend, Device::cpu(0), 2, vec![1f32, 2.])?;
    let add = OpExpr::builder("add").input("x").input("y").output("z").build()?;
    let interp = EagerInterpreter::consistent(backend, placement);
    assert!(matches!(interp.call(&add, &[x.clone(), y], &AttrMap::new()), Err(StrataError::DeviceError(_))));
    assert!(matches!(interp.call(&add, &[x, m], &AttrMap::new()), Err(StrataError::DeviceError(_))));
    Ok(())
}

#[test]
fn consistent_variable_layout() -> Result<(), StrataError> {
    let (backend, placement) = two_devices()?;
    let interp = EagerInterpreter::consistent(backend, placement.clone());
    let w = OpExpr::variable("w", [3, 2], DType::F32, Initializer::Ones, Sbp::Split(0));
    let w = interp.call(&w, &[], &AttrMap::new())?;
    assert_eq!(w[0].placement(), &placement);
    let parts = &w[0].consistent_blob().components;
    assert_eq!(parts[0].desc().shape, Shape::from([2, 2]));
    assert_eq!(parts[1].desc().shape, Shape::from([1, 2]));
    assert_eq!(w[0].to_vec::<f32>()?, [1.; 6]);
    Ok(())
}

#[test]
fn cast_to_and_from_mirrored() -> Result<(), StrataError> {
    init();
    let (backend, placement) = two_devices()?;
    let x = Tensor::consistent_from_host(&backend, &placement, Sbp::Split(0), [4, 1], vec![1f32, 2., 3., 4.])?;
    let interp = EagerInterpreter::consistent(backend, placement.clone());
    let parts = interp.call(&OpExpr::cast_to_mirrored("to_local", 2), &[x.clone()], &AttrMap::new())?;
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|p| !p.is_consistent()));
    assert_eq!(parts[0].device(), Device::cpu(0));
    assert_eq!(parts[1].device(), Device::cpu(1));
    assert_eq!(parts[1].to_vec::<f32>()?, [3., 4.]);
    // Components are shared, not copied
    assert_eq!(parts[0].blob().buffer_id(), x.consistent_blob().components[0].buffer_id());

    let back = interp.call(&OpExpr::cast_from_mirrored("to_global", 2, Sbp::Split(0)), &parts, &AttrMap::new())?;
    assert_eq!(back[0].shape(), &Shape::from([4, 1]));
    assert_eq!(back[0].placement(), &placement);
    assert_eq!(back[0].to_vec::<f32>()?, [1., 2., 3., 4.]);

    let summed = interp.call(&OpExpr::cast_from_mirrored("sum", 2, Sbp::PartialSum), &parts, &AttrMap::new())?;
    assert_eq!(summed[0].shape(), &Shape::from([2, 1]));
    assert_eq!(summed[0].to_vec::<f32>()?, [4., 6.]);

    assert!(interp.call(&OpExpr::cast_to_mirrored("to_local", 3), &[x], &AttrMap::new()).is_err());
    Ok(())
}

#[test]
fn distribute_split_and_concat() -> Result<(), StrataError> {
    let (backend, placement) = two_devices()?;
    let x = Tensor::from_host(&backend, Device::cpu(0), [3, 2], vec![1i64, 2, 3, 4, 5, 6])?;
    let interp = EagerInterpreter::mirrored(backend);
    let parts = interp.call(&OpExpr::distribute_split("split", 0, placement.clone()), &[x], &AttrMap::new())?;
    assert_eq!(parts[0].shape(), &Shape::from([2, 2]));
    assert_eq!(parts[1].shape(), &Shape::from([1, 2]));
    assert_eq!(parts[1].device(), Device::cpu(1));
    assert_eq!(parts[1].to_vec::<i64>()?, [5, 6]);

    let joined = interp.call(&OpExpr::distribute_concat("concat", 0, 2), &parts, &AttrMap::new())?;
    assert_eq!(joined[0].device(), Device::cpu(0));
    assert_eq!(joined[0].to_vec::<i64>()?, [1, 2, 3, 4, 5, 6]);

    let clones = interp.call(&OpExpr::distribute_clone("clone", placement), &joined, &AttrMap::new())?;
    let sum = interp.call(&OpExpr::distribute_add("add", 2), &clones, &AttrMap::new())?;
    assert_eq!(sum[0].to_vec::<i64>()?, [2, 4, 6, 8, 10, 12]);
    Ok(())
}

#[test]
fn consistent_distribute_ops() -> Result<(), StrataError> {
    let (backend, placement) = two_devices()?;
    let x = Tensor::consistent_from_host(&backend, &Placement::single(Device::cpu(0)), Sbp::Broadcast, 4, vec![1f32, 2., 3., 4.])?;
    let interp = EagerInterpreter::consistent(backend, placement.clone());
    let parts = interp.call(&OpExpr::distribute_split("split", 0, placement.clone()), &[x], &AttrMap::new())?;
    assert!(parts.iter().all(Tensor::is_consistent));
    assert_eq!(parts[1].placement(), &Placement::single(Device::cpu(1)));

    let joined = interp.call(&OpExpr::distribute_concat("concat", 0, 2), &parts, &AttrMap::new())?;
    assert_eq!(joined[0].placement(), &placement);
    assert_eq!(joined[0].sbp(), Sbp::Split(0));
    assert_eq!(joined[0].to_vec::<f32>()?, [1., 2., 3., 4.]);
    Ok(())
}
