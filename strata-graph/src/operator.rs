//! Graph side operators.
//!
//! Only the model update operator is built by task nodes of this crate.
//! Its blob names (bns) are the slots bound to registers by exec nodes.

use crate::register::BlobDesc;
use std::collections::BTreeMap;
use strata_core::config::{JobConfig, ModelUpdateConf, ModelUpdateRule};
use strata_core::error::StrataError;

/// Position of one task among the tasks running the same operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelContext {
    /// Index of this task
    pub parallel_id: usize,
    /// Number of tasks
    pub parallel_num: usize,
}

impl Default for ParallelContext {
    fn default() -> Self {
        Self { parallel_id: 0, parallel_num: 1 }
    }
}

/// Blob descs looked up by blob name in operator
pub type BlobDescLookup = BTreeMap<String, Option<BlobDesc>>;

/// Operator bound into exec graphs
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    name: String,
    op_type: &'static str,
    conf: ModelUpdateConf,
    input_bns: Vec<String>,
    output_bns: Vec<String>,
    data_tmp_bns: Vec<String>,
}

const MODEL_BN: &str = "model";

impl Operator {
    /// Model update operator applying in_num accumulated model diffs.
    /// Transient state of the update rule lives in data tmp blobs.
    #[must_use]
    pub fn model_update(name: &str, conf: ModelUpdateConf, in_num: usize) -> Self {
        let (op_type, data_tmp_bns): (_, &[&str]) = match conf.rule {
            ModelUpdateRule::Naive => ("naive_model_update", &[]),
            ModelUpdateRule::Momentum { .. } => ("momentum_model_update", &["momentum"]),
            ModelUpdateRule::RMSProp { .. } => ("rmsprop_model_update", &["mean_square"]),
            ModelUpdateRule::Adam { .. } => ("adam_model_update", &["m", "v"]),
        };
        Self {
            name: name.into(),
            op_type,
            conf,
            input_bns: (0..in_num).map(|i| format!("model_diffs_{i}")).collect(),
            output_bns: vec![MODEL_BN.into()],
            data_tmp_bns: data_tmp_bns.iter().map(|bn| (*bn).into()).collect(),
        }
    }

    /// Unique operator name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operator type
    #[must_use]
    pub const fn op_type(&self) -> &'static str {
        self.op_type
    }

    /// Update rule configuration
    #[must_use]
    pub const fn conf(&self) -> &ModelUpdateConf {
        &self.conf
    }

    /// Input blob names in declaration order
    #[must_use]
    pub fn input_bns(&self) -> &[String] {
        &self.input_bns
    }

    /// Output blob names
    #[must_use]
    pub fn output_bns(&self) -> &[String] {
        &self.output_bns
    }

    /// Transient blob names
    #[must_use]
    pub fn data_tmp_bns(&self) -> &[String] {
        &self.data_tmp_bns
    }

    /// The only output blob name
    pub fn sole_obn(&self) -> Result<&str, StrataError> {
        match self.output_bns.as_slice() {
            [obn] => Ok(obn),
            obns => Err(StrataError::binding_error(format!("{} has {} outputs, not one", self.name, obns.len()))),
        }
    }

    /// Logical blob name of blob name in this operator
    #[must_use]
    pub fn lbn4bn(&self, bn: &str) -> String {
        format!("{}/{bn}", self.name)
    }

    /// Fills in descs of outputs and data tmp blobs from bound inputs
    pub fn infer_blob_descs(
        &self,
        blob_desc4bn: &mut BlobDescLookup,
        parallel_ctx: &ParallelContext,
        job: &JobConfig,
    ) -> Result<(), StrataError> {
        log::trace!("Inferring blob descs of {} at {parallel_ctx:?}", self.name);
        let model = blob_desc4bn
            .get(MODEL_BN)
            .cloned()
            .flatten()
            .ok_or_else(|| StrataError::NotFound(format!("blob desc of model bound to {}", self.name).into()))?;
        if model.dtype != job.default_dtype {
            return Err(StrataError::dtype_error(format!(
                "model of {} is {}, job default is {}",
                self.name, model.dtype, job.default_dtype
            )));
        }
        if model.has_data_id_field {
            return Err(StrataError::dtype_error(format!("model of {} has data id field", self.name)));
        }
        for ibn in &self.input_bns {
            if let Some(Some(diff)) = blob_desc4bn.get(ibn) {
                if diff.shape != model.shape {
                    return Err(StrataError::shape_error(format!(
                        "{ibn} of {} is {}, model is {}",
                        self.name, diff.shape, model.shape
                    )));
                }
            }
        }
        for bn in &self.data_tmp_bns {
            blob_desc4bn.insert(bn.clone(), Some(model.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::dtype::DType;

    #[test]
    fn adam_keeps_two_moments() -> Result<(), StrataError> {
        let conf = ModelUpdateConf { rule: ModelUpdateRule::Adam { beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }, learning_rate: 1e-3 };
        let op = Operator::model_update("md_update_7", conf, 2);
        assert_eq!(op.input_bns(), ["model_diffs_0", "model_diffs_1"]);
        assert_eq!(op.sole_obn()?, "model");
        assert_eq!(op.lbn4bn("m"), "md_update_7/m");
        let mut descs = BlobDescLookup::new();
        descs.insert("model".into(), Some(BlobDesc::new(10, DType::F32)));
        descs.insert("model_diffs_0".into(), None);
        op.infer_blob_descs(&mut descs, &ParallelContext::default(), &JobConfig::train())?;
        assert_eq!(descs["m"], Some(BlobDesc::new(10, DType::F32)));
        assert_eq!(descs["v"], Some(BlobDesc::new(10, DType::F32)));
        Ok(())
    }

    #[test]
    fn model_dtype_follows_job() {
        let op = Operator::model_update("md_update_0", ModelUpdateConf::default(), 1);
        let mut descs = BlobDescLookup::new();
        descs.insert("model".into(), Some(BlobDesc::new(10, DType::F64)));
        assert!(matches!(
            op.infer_blob_descs(&mut descs, &ParallelContext::default(), &JobConfig::train()),
            Err(StrataError::DTypeError(_))
        ));
    }
}
