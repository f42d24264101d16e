//! Model checkpoints and key-tolerant state restore.
//!
//! A checkpoint bundles the module state dict, the optimizer state and free
//! form string metadata (epoch, global step, ...) in one
//! [`safetensors`](crate::serialization::safetensors) container:
//!
//! | entry                      | content                          |
//! |----------------------------|----------------------------------|
//! | `state_dict.<name>`        | parameter or buffer              |
//! | `optimizer.momentum.<name>`| momentum buffer                  |
//! | `__metadata__["optimizer.groups"]` | parameter groups as JSON |
//! | `__metadata__[<key>]`      | caller metadata                  |
//!
//! Restoring is optimistic: keys that do not fit the module are reported and
//! skipped, never fatal.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{RelGatError, Result};
use crate::nn::Module;
use crate::nn::optim::{OptimizerState, ParamGroup, SGD};
use crate::serialization::safetensors::{self, UserMetadata};
use crate::tensor::Tensor;

const STATE_DICT_PREFIX: &str = "state_dict.";
const MOMENTUM_PREFIX: &str = "optimizer.momentum.";
const GROUPS_KEY: &str = "optimizer.groups";

/// Mapping from dotted parameter/buffer names to tensors.
pub type StateDict = BTreeMap<String, Tensor>;

/// Snapshot every parameter and buffer of `module` (without gradients).
#[must_use]
pub fn state_dict(module: &dyn Module) -> StateDict {
    module
        .named_parameters()
        .into_iter()
        .chain(module.named_buffers())
        .map(|(name, t)| (name, t.detach()))
        .collect()
}

/// How checkpoint keys are matched against module names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Substring renames applied in order to every checkpoint key.
    pub names_map: Vec<(String, String)>,
    /// Prefix tried when a (renamed) key is unknown to the module, for
    /// restoring a sub-model's checkpoint into its parent (`"detector."`).
    pub fallback_prefix: Option<String>,
}

impl RestoreOptions {
    #[must_use]
    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.names_map.push((from.into(), to.into()));
        self
    }

    #[must_use]
    pub fn with_fallback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fallback_prefix = Some(prefix.into());
        self
    }

    fn rename(&self, key: &str) -> String {
        self.names_map
            .iter()
            .fold(key.to_string(), |name, (from, to)| name.replace(from.as_str(), to))
    }
}

/// A checkpoint tensor whose shape differs from the module's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMismatch {
    pub name: String,
    pub model_shape: Vec<usize>,
    pub checkpoint_shape: Vec<usize>,
}

/// Outcome of [`optimistic_restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Module names that received a tensor.
    pub restored: Vec<String>,
    /// Checkpoint keys (after renaming) the module does not have.
    pub unexpected: Vec<String>,
    /// Keys present on both sides with different shapes.
    pub mismatched: Vec<KeyMismatch>,
    /// Module names the checkpoint did not provide.
    pub missing: Vec<String>,
    /// Number of keys resolved through the fallback prefix.
    pub via_fallback: usize,
}

impl RestoreReport {
    /// Whether every key matched in both directions.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unexpected.is_empty() && self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Copy every compatible tensor of `state` into `module`.
///
/// Each checkpoint key is renamed through `options.names_map`. When the result
/// is unknown but `fallback_prefix + key` exists, the prefixed name is used.
/// Tensors are copied only when shapes agree. Unexpected keys, shape
/// mismatches and missing names are logged with `warn!` and collected in the
/// report. When keys were resolved through the fallback prefix, only module
/// names under that prefix count as missing.
pub fn optimistic_restore(
    module: &mut dyn Module,
    state: &StateDict,
    options: &RestoreOptions,
) -> RestoreReport {
    let own_shapes: HashMap<String, Vec<usize>> = state_dict(module)
        .into_iter()
        .map(|(name, t)| (name, t.shape().to_vec()))
        .collect();

    let mut report = RestoreReport::default();
    let mut updates: HashMap<String, &Tensor> = HashMap::new();
    let mut seen = BTreeSet::new();

    for (key, tensor) in state {
        let renamed = options.rename(key);
        let name = match &options.fallback_prefix {
            Some(prefix) if !own_shapes.contains_key(&renamed) => {
                let prefixed = format!("{prefix}{renamed}");
                if own_shapes.contains_key(&prefixed) {
                    report.via_fallback += 1;
                    prefixed
                } else {
                    renamed
                }
            }
            _ => renamed,
        };
        seen.insert(name.clone());

        match own_shapes.get(&name) {
            None => {
                warn!(key = %name, shape = ?tensor.shape(), "unexpected key in state dict");
                report.unexpected.push(name);
            }
            Some(shape) if shape.as_slice() == tensor.shape() => {
                updates.insert(name, tensor);
            }
            Some(shape) => {
                warn!(
                    key = %name,
                    model = ?shape,
                    checkpoint = ?tensor.shape(),
                    "shape mismatch in state dict"
                );
                report.mismatched.push(KeyMismatch {
                    name,
                    model_shape: shape.clone(),
                    checkpoint_shape: tensor.shape().to_vec(),
                });
            }
        }
    }

    let scope = if report.via_fallback > 0 {
        options.fallback_prefix.as_deref()
    } else {
        None
    };
    let mut missing: Vec<String> = own_shapes
        .keys()
        .filter(|name| !seen.contains(*name))
        .filter(|name| scope.map_or(true, |prefix| name.starts_with(prefix)))
        .cloned()
        .collect();
    missing.sort();
    if !missing.is_empty() {
        warn!(keys = %missing.join(","), "missing keys in state dict");
    }
    report.missing = missing;

    let mut restored = Vec::new();
    for (name, target) in module.named_parameters_mut() {
        if let Some(src) = updates.get(&name) {
            target.data_mut().copy_from_slice(src.data());
            restored.push(name);
        }
    }
    for (name, target) in module.named_buffers_mut() {
        if let Some(src) = updates.get(&name) {
            target.data_mut().copy_from_slice(src.data());
            restored.push(name);
        }
    }
    restored.sort();
    report.restored = restored;

    info!(
        restored = report.restored.len(),
        total = state.len(),
        clean = report.is_clean(),
        "state dict restored"
    );
    report
}

/// Everything read back from a checkpoint file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    pub state_dict: StateDict,
    pub optimizer: Option<OptimizerState>,
    /// Caller metadata such as `epoch`.
    pub metadata: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Epoch recorded under the `epoch` metadata key.
    #[must_use]
    pub fn epoch(&self) -> Option<i64> {
        self.metadata.get("epoch").and_then(|e| e.parse().ok())
    }

    /// Encode into a container byte buffer.
    ///
    /// # Errors
    ///
    /// Returns `Format` if caller metadata uses the reserved optimizer key,
    /// `Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut tensors = BTreeMap::new();
        for (name, t) in &self.state_dict {
            tensors.insert(format!("{STATE_DICT_PREFIX}{name}"), t.detach());
        }

        let mut meta = UserMetadata::new();
        if let Some(opt) = &self.optimizer {
            meta.insert(GROUPS_KEY.to_string(), serde_json::to_string(&opt.groups)?);
            for (name, t) in &opt.momentum_buffers {
                tensors.insert(format!("{MOMENTUM_PREFIX}{name}"), t.detach());
            }
        }
        for (key, value) in &self.metadata {
            if key == GROUPS_KEY {
                return Err(RelGatError::Format(format!(
                    "metadata key '{GROUPS_KEY}' is reserved"
                )));
            }
            meta.insert(key.clone(), value.clone());
        }
        safetensors::to_bytes(&tensors, &meta)
    }

    /// Decode a container byte buffer.
    ///
    /// # Errors
    ///
    /// Returns `Format` for entries outside the checkpoint layout, plus every
    /// decoding error of the container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (tensors, mut meta) = safetensors::from_bytes(bytes)?;

        let mut state_dict = StateDict::new();
        let mut momentum_buffers = BTreeMap::new();
        for (key, tensor) in tensors {
            if let Some(name) = key.strip_prefix(STATE_DICT_PREFIX) {
                state_dict.insert(name.to_string(), tensor);
            } else if let Some(name) = key.strip_prefix(MOMENTUM_PREFIX) {
                momentum_buffers.insert(name.to_string(), tensor);
            } else {
                return Err(RelGatError::Format(format!("unknown checkpoint entry '{key}'")));
            }
        }

        let optimizer = match meta.remove(GROUPS_KEY) {
            Some(json) => {
                let groups: Vec<ParamGroup> = serde_json::from_str(&json)?;
                Some(OptimizerState {
                    groups,
                    momentum_buffers,
                })
            }
            None if momentum_buffers.is_empty() => None,
            None => {
                return Err(RelGatError::Format(
                    "momentum buffers without parameter groups".to_string(),
                ))
            }
        };

        Ok(Self {
            state_dict,
            optimizer,
            metadata: meta,
        })
    }
}

/// Write `module` (and optionally `optimizer`) to `path`.
///
/// `extra` is stored as string metadata; record the epoch under `epoch` so
/// [`Checkpoint::epoch`] can find it. A path without a directory part is
/// skipped with a warning and `Ok(false)` is returned.
///
/// # Errors
///
/// Returns `Io` if the file cannot be written and `Format`/`Serialization` if
/// the checkpoint cannot be encoded.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    module: &dyn Module,
    optimizer: Option<&SGD>,
    extra: &BTreeMap<String, String>,
) -> Result<bool> {
    let path = path.as_ref();
    let has_dir = path
        .parent()
        .is_some_and(|dir| !dir.as_os_str().is_empty());
    if !has_dir {
        warn!(path = %path.display(), "skip checkpointing: save directory is not specified");
        return Ok(false);
    }

    info!(path = %path.display(), "checkpointing");
    let checkpoint = Checkpoint {
        state_dict: state_dict(module),
        optimizer: optimizer.map(SGD::state),
        metadata: extra.clone(),
    };
    std::fs::write(path, checkpoint.to_bytes()?)?;
    Ok(true)
}

/// Read a checkpoint written by [`save_checkpoint`].
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `Format`/`Serialization` for
/// a corrupt file.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading checkpoint");
    let bytes = std::fs::read(path)?;
    Checkpoint::from_bytes(&bytes)
}

/// Restore `module` from `checkpoint` and return the epoch to resume after.
///
/// The recorded epoch is returned only when the restore was clean; any
/// mismatch or a checkpoint without an epoch yields `-1` (train from scratch
/// on top of the partially restored weights).
pub fn resume(
    module: &mut dyn Module,
    checkpoint: &Checkpoint,
    options: &RestoreOptions,
) -> (i64, RestoreReport) {
    let report = optimistic_restore(module, &checkpoint.state_dict, options);
    let start_epoch = match checkpoint.epoch() {
        Some(epoch) if report.is_clean() => epoch,
        _ => -1,
    };
    (start_epoch, report)
}
