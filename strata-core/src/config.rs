//! Job configuration.
//!
//! Read only from the point of view of interpreters and task nodes.
//! [`JobConfig::load`] looks for `strata/job_config.json` in xdg config
//! directories and falls back to defaults when the file is missing or invalid.

use crate::dtype::DType;
use crate::error::StrataError;
use nanoserde::DeJson;
use std::path::PathBuf;

/// Upper bound of register count used when staleness is unbounded
pub const MAX_REGISTER_NUM: i32 = i16::MAX as i32;

/// Execution mode of the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Inference only, no gradients and a single model version
    Predict,
    /// Training
    Train,
}

/// How model is updated from accumulated gradients
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelUpdateRule {
    /// model -= lr * diff
    Naive,
    /// Momentum sgd
    Momentum {
        /// Momentum decay
        beta: f32,
    },
    /// RMSProp
    RMSProp {
        /// Decay of mean square
        decay_rate: f32,
        /// Numerical stability term
        epsilon: f32,
    },
    /// Adam
    Adam {
        /// First moment decay
        beta1: f32,
        /// Second moment decay
        beta2: f32,
        /// Numerical stability term
        epsilon: f32,
    },
}

/// Model update section of train configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelUpdateConf {
    /// Update rule
    pub rule: ModelUpdateRule,
    /// Learning rate
    pub learning_rate: f32,
}

impl Default for ModelUpdateConf {
    fn default() -> Self {
        Self { rule: ModelUpdateRule::Naive, learning_rate: 0.01 }
    }
}

/// Configuration of one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Name of job
    pub job_name: String,
    /// Predict or train
    pub mode: ExecutionMode,
    /// Maximum number of in flight stale model versions, None is unbounded
    pub staleness: Option<u32>,
    /// Global maximum register count
    pub max_register_num: i32,
    /// Default data type of model blobs
    pub default_dtype: DType,
    /// Model update configuration, used only in train mode
    pub model_update: ModelUpdateConf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::train()
    }
}

// Raw json layout, every field optional
#[derive(DeJson, Debug, Default)]
struct JobConfigFile {
    #[nserde(default)]
    job_name: Option<String>,
    #[nserde(default)]
    mode: Option<String>,
    #[nserde(default)]
    staleness: Option<i64>,
    #[nserde(default)]
    max_register_num: Option<i32>,
    #[nserde(default)]
    default_dtype: Option<String>,
    #[nserde(default)]
    model_update: Option<ModelUpdateFile>,
}

#[derive(DeJson, Debug, Default)]
struct ModelUpdateFile {
    #[nserde(default)]
    rule: Option<String>,
    #[nserde(default)]
    learning_rate: Option<f32>,
    #[nserde(default)]
    beta: Option<f32>,
    #[nserde(default)]
    beta1: Option<f32>,
    #[nserde(default)]
    beta2: Option<f32>,
    #[nserde(default)]
    decay_rate: Option<f32>,
    #[nserde(default)]
    epsilon: Option<f32>,
}

impl JobConfig {
    /// Default train configuration with staleness 0
    #[must_use]
    pub fn train() -> Self {
        Self {
            job_name: "default".into(),
            mode: ExecutionMode::Train,
            staleness: Some(0),
            max_register_num: MAX_REGISTER_NUM,
            default_dtype: DType::F32,
            model_update: ModelUpdateConf::default(),
        }
    }

    /// Default predict configuration
    #[must_use]
    pub fn predict() -> Self {
        Self { mode: ExecutionMode::Predict, ..Self::train() }
    }

    /// Same config with given staleness, None is unbounded
    #[must_use]
    pub fn with_staleness(mut self, staleness: Option<u32>) -> Self {
        self.staleness = staleness;
        self
    }

    /// Same config with given global maximum register count
    #[must_use]
    pub fn with_max_register_num(mut self, max_register_num: i32) -> Self {
        self.max_register_num = max_register_num;
        self
    }

    /// Same config with given model update rule
    #[must_use]
    pub fn with_model_update(mut self, model_update: ModelUpdateConf) -> Self {
        self.model_update = model_update;
        self
    }

    /// Is this an inference job
    #[must_use]
    pub fn is_predict(&self) -> bool {
        self.mode == ExecutionMode::Predict
    }

    /// Is this a training job
    #[must_use]
    pub fn is_train(&self) -> bool {
        self.mode == ExecutionMode::Train
    }

    /// Parse configuration from json, missing fields take default values
    pub fn from_json(json: &str) -> Result<Self, StrataError> {
        let file = JobConfigFile::deserialize_json(json)
            .map_err(|e| StrataError::parse_error(format!("job config: {e:?}")))?;
        let mut config = match file.mode.as_deref() {
            None | Some("train") => Self::train(),
            Some("predict") => Self::predict(),
            Some(mode) => return Err(StrataError::parse_error(format!("unknown execution mode {mode:?}"))),
        };
        if let Some(job_name) = file.job_name {
            config.job_name = job_name;
        }
        if let Some(staleness) = file.staleness {
            config.staleness = parse_staleness(staleness)?;
        }
        if let Some(max_register_num) = file.max_register_num {
            if max_register_num < 2 {
                return Err(StrataError::parse_error(format!(
                    "max_register_num must be at least 2, got {max_register_num}"
                )));
            }
            config.max_register_num = max_register_num;
        }
        if let Some(dtype) = file.default_dtype {
            config.default_dtype = dtype.parse()?;
        }
        if let Some(md) = file.model_update {
            config.model_update = md.into_conf()?;
        }
        Ok(config)
    }

    /// Search xdg config directories for `strata/job_config.json`,
    /// apply `STRATA_PREDICT` and `STRATA_STALENESS` env overrides.
    /// Missing or invalid file yields defaults.
    #[must_use]
    pub fn load() -> Self {
        let mut config = xdg::BaseDirectories::new()
            .map_err(|e| log::debug!("Failed to find config directories for job_config.json, {e}"))
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths: Vec<PathBuf>| {
                paths.into_iter().find_map(|mut path| {
                    path.push("strata/job_config.json");
                    std::fs::read_to_string(&path).ok()
                })
            })
            .and_then(|file| {
                Self::from_json(&file)
                    .map_err(|e| log::warn!("Failed to parse job_config.json, {e}"))
                    .ok()
            })
            .inspect(|_| log::debug!("Job config successfully read and parsed."))
            .unwrap_or_else(|| {
                log::debug!("Failed to get job config, using defaults.");
                Self::default()
            });
        if let Ok(x) = std::env::var("STRATA_PREDICT") {
            if x == "1" || x == "true" {
                config.mode = ExecutionMode::Predict;
            }
        }
        if let Ok(x) = std::env::var("STRATA_STALENESS") {
            config.override_staleness(&x);
        }
        config
    }

    /// Applies staleness given as text, invalid values are logged and ignored
    fn override_staleness(&mut self, value: &str) {
        let staleness = value
            .trim()
            .parse::<i64>()
            .map_err(|e| StrataError::parse_error(format!("staleness {value:?}: {e}")))
            .and_then(parse_staleness);
        match staleness {
            Ok(staleness) => self.staleness = staleness,
            Err(e) => log::warn!("Ignoring STRATA_STALENESS, {e}"),
        }
    }
}

/// -1 is unbounded, other negative values are invalid
fn parse_staleness(staleness: i64) -> Result<Option<u32>, StrataError> {
    match staleness {
        -1 => Ok(None),
        s if s >= 0 => u32::try_from(s)
            .map(Some)
            .map_err(|e| StrataError::parse_error(format!("staleness {s}: {e}"))),
        s => Err(StrataError::parse_error(format!("staleness must be -1 or positive, got {s}"))),
    }
}

impl ModelUpdateFile {
    fn into_conf(self) -> Result<ModelUpdateConf, StrataError> {
        let rule = match self.rule.as_deref() {
            None | Some("naive") => ModelUpdateRule::Naive,
            Some("momentum") => ModelUpdateRule::Momentum { beta: self.beta.unwrap_or(0.9) },
            Some("rmsprop") => ModelUpdateRule::RMSProp {
                decay_rate: self.decay_rate.unwrap_or(0.99),
                epsilon: self.epsilon.unwrap_or(1e-8),
            },
            Some("adam") => ModelUpdateRule::Adam {
                beta1: self.beta1.unwrap_or(0.9),
                beta2: self.beta2.unwrap_or(0.999),
                epsilon: self.epsilon.unwrap_or(1e-8),
            },
            Some(rule) => return Err(StrataError::parse_error(format!("unknown model update rule {rule:?}"))),
        };
        Ok(ModelUpdateConf { rule, learning_rate: self.learning_rate.unwrap_or(0.01) })
    }
}
