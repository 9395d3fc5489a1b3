use std::sync::Arc;
use strata_core::attr::AttrMap;
use strata_core::autograd::{is_grad_enabled, no_grad, AutogradInterpreter, GradientTape};
use strata_core::backend::KernelBackend;
use strata_core::device::Device;
use strata_core::error::StrataError;
use strata_core::interpreter::{EagerInterpreter, OpExprInterpreter};
use strata_core::op_expr::OpExpr;
use strata_core::tensor::{OpExprInterpState, Tensor};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn autograd(backend: &Arc<dyn KernelBackend>) -> AutogradInterpreter {
    GradientTape::clear();
    AutogradInterpreter::new(Arc::new(EagerInterpreter::mirrored(backend.clone())))
}

fn sum_all() -> Result<OpExpr, StrataError> {
    OpExpr::builder("reduce_sum").input("x").output("y").attr("axes", Vec::<i64>::new()).build()
}

#[test]
fn outputs_are_those_of_inner() -> Result<(), StrataError> {
    init();
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let x = Tensor::from_host(&backend, Device::cpu(0), 3, vec![-1f32, 0., 2.])?;
    let relu = OpExpr::builder("relu").input("x").output("y").build()?;
    let plain = interp.inner().call(&relu, &[x.clone()], &AttrMap::new())?;
    x.set_requires_grad(true);
    let y = interp.call(&relu, &[x.clone()], &AttrMap::new())?;
    assert_eq!(y[0].to_vec::<f32>()?, plain[0].to_vec::<f32>()?);
    assert!(y[0].requires_grad());
    assert_eq!(GradientTape::len(), 1);
    let node = &GradientTape::nodes()[0];
    assert_eq!(node.input_ids, [x.id()]);
    assert_eq!(node.output_ids, [y[0].id()]);
    Ok(())
}

#[test]
fn untracked_inputs_are_not_recorded() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![1f32, 2.])?;
    let neg = OpExpr::builder("neg").input("x").output("y").build()?;
    let y = interp.call(&neg, &[x], &AttrMap::new())?;
    assert!(!y[0].requires_grad());
    assert!(GradientTape::is_empty());
    Ok(())
}

#[test]
fn mul_gradients() -> Result<(), StrataError> {
    init();
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let x = Tensor::from_host(&backend, Device::cpu(0), 3, vec![1f32, 2., 3.])?;
    let w = Tensor::from_host(&backend, Device::cpu(0), 3, vec![4f32, 5., 6.])?;
    x.set_requires_grad(true);
    w.set_requires_grad(true);
    let mul = OpExpr::builder("mul").input("x").input("y").output("z").build()?;
    let z = interp.call(&mul, &[x.clone(), w.clone()], &AttrMap::new())?;
    let loss = interp.call(&sum_all()?, &z, &AttrMap::new())?;
    assert_eq!(loss[0].to_vec::<f32>()?, [32.]);
    let grads = interp.gradient(&loss[0], &[x, w])?;
    let dx = grads[0].as_ref().ok_or_else(|| StrataError::NotFound("dx".into()))?;
    let dw = grads[1].as_ref().ok_or_else(|| StrataError::NotFound("dw".into()))?;
    assert_eq!(dx.to_vec::<f32>()?, [4., 5., 6.]);
    assert_eq!(dw.to_vec::<f32>()?, [1., 2., 3.]);
    Ok(())
}

#[test]
fn matmul_gradients() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let a = Tensor::from_host(&backend, Device::cpu(0), [2, 3], vec![1f32, 2., 3., 4., 5., 6.])?;
    let b = Tensor::from_host(&backend, Device::cpu(0), [3, 2], vec![1f32, 0., 0., 1., 1., 1.])?;
    a.set_requires_grad(true);
    b.set_requires_grad(true);
    let matmul = OpExpr::builder("matmul").input("a").input("b").output("out").build()?;
    let y = interp.call(&matmul, &[a.clone(), b.clone()], &AttrMap::new())?;
    let loss = interp.call(&sum_all()?, &y, &AttrMap::new())?;
    let grads = interp.gradient(&loss[0], &[a.clone(), b.clone()])?;
    let da = grads[0].as_ref().ok_or_else(|| StrataError::NotFound("da".into()))?;
    let db = grads[1].as_ref().ok_or_else(|| StrataError::NotFound("db".into()))?;
    assert_eq!(da.shape(), a.shape());
    assert_eq!(db.shape(), b.shape());
    assert_eq!(da.to_vec::<f32>()?, [1., 1., 2., 1., 1., 2.]);
    assert_eq!(db.to_vec::<f32>()?, [5., 5., 7., 7., 9., 9.]);
    Ok(())
}

#[test]
fn reused_input_accumulates() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![3f64, -1.])?;
    x.set_requires_grad(true);
    let add = OpExpr::builder("add").input("x").input("y").output("z").build()?;
    let y = interp.call(&add, &[x.clone(), x.clone()], &AttrMap::new())?;
    let loss = interp.call(&sum_all()?, &y, &AttrMap::new())?;
    let unrelated = Tensor::from_host(&backend, Device::cpu(0), 1, vec![0f64])?;
    let grads = interp.gradient(&loss[0], &[x, unrelated])?;
    let dx = grads[0].as_ref().ok_or_else(|| StrataError::NotFound("dx".into()))?;
    assert_eq!(dx.to_vec::<f64>()?, [2., 2.]);
    assert!(grads[1].is_none());
    Ok(())
}

#[test]
fn training_loop_releases_buffers() -> Result<(), StrataError> {
    let cpu = strata_cpu::device();
    let backend: Arc<dyn KernelBackend> = cpu.clone();
    let interp = autograd(&backend);
    let neg = OpExpr::builder("neg").input("x").output("y").build()?;
    for _ in 0..100 {
        let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![1f32, 2.])?;
        x.set_requires_grad(true);
        let y = interp.call(&neg, &[x.clone()], &AttrMap::new())?;
        let grads = interp.gradient(&y[0], &[x])?;
        let dx = grads[0].as_ref().ok_or_else(|| StrataError::NotFound("dx".into()))?;
        assert_eq!(dx.to_vec::<f32>()?, [-1., -1.]);
    }
    assert!(GradientTape::is_empty());
    assert_eq!(cpu.live_buffers(), 0);
    Ok(())
}

#[test]
fn tape_scope_drops_its_nodes() -> Result<(), StrataError> {
    let cpu = strata_cpu::device();
    let backend: Arc<dyn KernelBackend> = cpu.clone();
    let interp = autograd(&backend);
    let neg = OpExpr::builder("neg").input("x").output("y").build()?;
    let exp = OpExpr::builder("exp").input("x").output("y").build()?;
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![0f32, 1.])?;
    x.set_requires_grad(true);
    let outer = interp.call(&exp, &[x.clone()], &AttrMap::new())?;
    assert_eq!(GradientTape::len(), 1);
    {
        let tape = GradientTape::new();
        let y = interp.call(&neg, &[x.clone()], &AttrMap::new())?;
        let grads = tape.gradient_persistent(interp.inner().as_ref(), &y[0], &[x.clone()])?;
        assert!(grads[0].is_some());
        assert_eq!(GradientTape::len(), 2);
    }
    assert_eq!(GradientTape::len(), 1);

    let tape = GradientTape::new();
    let y = interp.call(&neg, &[x.clone()], &AttrMap::new())?;
    let grads = tape.gradient(interp.inner().as_ref(), &y[0], &[x.clone()])?;
    let dx = grads[0].as_ref().ok_or_else(|| StrataError::NotFound("dx".into()))?;
    assert_eq!(dx.to_vec::<f32>()?, [-1., -1.]);
    assert_eq!(GradientTape::len(), 1);
    assert_eq!(GradientTape::nodes()[0].output_ids, [outer[0].id()]);

    drop((grads, y, outer, x));
    GradientTape::clear();
    assert_eq!(cpu.live_buffers(), 0);
    Ok(())
}

#[test]
fn no_grad_records_nothing() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = autograd(&backend);
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![1f32, 2.])?;
    x.set_requires_grad(true);
    let exp = OpExpr::builder("exp").input("x").output("y").build()?;
    {
        let _guard = no_grad();
        assert!(!is_grad_enabled());
        let y = interp.call(&exp, &[x.clone()], &AttrMap::new())?;
        assert!(!y[0].requires_grad());
    }
    assert!(is_grad_enabled());
    assert!(GradientTape::is_empty());
    interp.call(&exp, &[x], &AttrMap::new())?;
    assert_eq!(GradientTape::len(), 1);
    Ok(())
}

#[test]
fn saved_tensors() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let x = Tensor::from_host(&backend, Device::cpu(0), 2, vec![1f32, 2.])?;
    let y = Tensor::from_host(&backend, Device::cpu(0), 2, vec![3f32, 4.])?;
    let mut state = OpExprInterpState::new();
    assert_eq!(state.save_tensor_for_backward(&x), 0);
    assert_eq!(state.save_tensor_for_backward(&y), 1);
    assert!(state.saved_tensors()[0].same_as(&x));
    assert!(state.saved_tensors()[1].same_as(&y));
    assert!(!state.saved_tensors()[1].same_as(&x));
    assert_eq!(state.saved_tensors()[1].to_vec::<f32>()?, [3., 4.]);
    Ok(())
}
