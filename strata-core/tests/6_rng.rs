// The default generator is process wide, everything touching it lives in one test
use std::sync::Arc;
use strata_core::attr::AttrMap;
use strata_core::backend::KernelBackend;
use strata_core::device::Device;
use strata_core::dtype::DType;
use strata_core::error::StrataError;
use strata_core::interpreter::{EagerInterpreter, OpExprInterpreter};
use strata_core::op_expr::{Initializer, OpExpr};
use strata_core::rng::{create_generator, default_generator, manual_seed, RandomMaskGenerator};
use strata_core::sbp::Sbp;

#[test]
fn manual_seed_restarts_default_stream() -> Result<(), StrataError> {
    let backend: Arc<dyn KernelBackend> = strata_cpu::device();
    let interp = EagerInterpreter::mirrored(backend);
    let w = OpExpr::variable("w", 8, DType::F32, Initializer::Normal { mean: 0.0, std: 1.0 }, Sbp::Broadcast);
    let generator = manual_seed(1234);
    assert!(Arc::ptr_eq(&generator, &default_generator()));
    assert_eq!(default_generator().current_seed(), 1234);
    let a = interp.call(&w, &[], &AttrMap::new())?[0].to_vec::<f32>()?;
    let b = interp.call(&w, &[], &AttrMap::new())?[0].to_vec::<f32>()?;
    assert_ne!(a, b);
    manual_seed(1234);
    let c = interp.call(&w, &[], &AttrMap::new())?[0].to_vec::<f32>()?;
    assert_eq!(a, c);
    Ok(())
}

#[test]
fn created_generators() -> Result<(), StrataError> {
    let g = create_generator("cpu:1", Some(9))?;
    assert_eq!(g.device(), Device::cpu(1));
    assert_eq!(g.current_seed(), 9);
    assert_eq!(create_generator("cuda", Some(0))?.device(), Device::cuda(0));
    assert!(matches!(create_generator("tpu:0", None), Err(StrataError::ParseError(_))));

    let same = create_generator("cpu", Some(9))?;
    assert_eq!(g.uniform(5, 0.0, 1.0), same.uniform(5, 0.0, 1.0));
    let masks = RandomMaskGenerator::new(create_generator("cpu", Some(2))?);
    let mask = masks.generate(64, 0.0);
    assert!(mask.iter().all(|m| *m == 1));
    assert!(masks.generate(64, 1.0).iter().all(|m| *m == 0));
    Ok(())
}
