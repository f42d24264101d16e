//! Training-loop helpers: configuration, seeding, mode switching and a
//! parameter summary.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RelGatError, Result};
use crate::nn::Module;

/// Optimizer and schedule settings for a training run.
///
/// # Example
///
/// ```
/// use relgat::train::TrainConfig;
///
/// let config = TrainConfig::from_json_str(r#"{"lr": 0.01, "steps": [10, 15]}"#).unwrap();
/// assert_eq!(config.steps, vec![10, 15]);
/// assert!((config.momentum - 0.9).abs() < 1e-7);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Base learning rate.
    pub lr: f32,
    /// Weight decay.
    pub l2: f32,
    /// SGD momentum.
    pub momentum: f32,
    /// Epochs after which the learning rate decays (shifted by one when
    /// building the schedule).
    pub steps: Vec<usize>,
    /// Multiplicative decay applied at every step.
    pub lr_decay: f32,
    /// Global gradient norm limit.
    pub clip: f32,
    /// Parameter name prefixes trained at a tenth of the learning rate.
    pub reduced_lr_prefixes: Vec<String>,
    /// Seed for every random stream of the run.
    pub seed: Option<u64>,
}

impl TrainConfig {
    pub const MOMENTUM: f32 = 0.9;

    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON and `InvalidHyperparameter`
    /// for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, plus every error of
    /// [`TrainConfig::from_json_str`].
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Random stream for the run: [`seeded_rng`] when `seed` is set, OS
    /// entropy otherwise.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => seeded_rng(seed),
            None => {
                debug!("no seed configured; drawing one from the OS");
                StdRng::from_entropy()
            }
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` for a non-positive learning rate or clip
    /// norm, negative weight decay, momentum outside `[0, 1)` or a decay outside
    /// `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(RelGatError::invalid_hyperparameter("lr", self.lr, "> 0"));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(RelGatError::invalid_hyperparameter("l2", self.l2, ">= 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(RelGatError::invalid_hyperparameter(
                "momentum",
                self.momentum,
                "[0, 1)",
            ));
        }
        if !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return Err(RelGatError::invalid_hyperparameter(
                "lr_decay",
                self.lr_decay,
                "(0, 1]",
            ));
        }
        if !(self.clip.is_finite() && self.clip > 0.0) {
            return Err(RelGatError::invalid_hyperparameter("clip", self.clip, "> 0"));
        }
        Ok(())
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            l2: 1e-4,
            momentum: Self::MOMENTUM,
            steps: vec![15],
            lr_decay: 0.1,
            clip: 5.0,
            reduced_lr_prefixes: vec!["roi_fmap".to_string()],
            seed: None,
        }
    }
}

/// Deterministic random stream for `seed`.
///
/// Pass the same handle to every forward call of a run to reproduce dropout
/// masks.
#[must_use]
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Put `module` in training (`true`) or evaluation mode.
pub fn set_mode(module: &mut dyn Module, is_train: bool) {
    if is_train {
        module.train();
    } else {
        module.eval();
    }
    debug!(training = module.training(), "mode set");
}

/// Whether a parameter is left out of the summary table.
fn is_bias_or_norm(name: &str) -> bool {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.contains("bias") || name.split('.').any(|p| p.starts_with("bn"))
}

/// Human-readable parameter table, largest first.
///
/// Bias and normalization parameters are omitted from the table but counted
/// in the total, which is reported in millions.
#[must_use]
pub fn parameter_summary(module: &dyn Module) -> String {
    let params = module.named_parameters();
    let total: usize = params.iter().map(|(_, p)| p.numel()).sum();

    let mut rows: Vec<(String, String, usize)> = params
        .iter()
        .filter(|(name, _)| !is_bias_or_norm(name))
        .map(|(name, p)| {
            let dims: Vec<String> = p.shape().iter().map(ToString::to_string).collect();
            (name.clone(), format!("[{}]", dims.join(",")), p.numel())
        })
        .collect();
    rows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let lines: Vec<String> = rows
        .iter()
        .map(|(name, dims, numel)| format!("{name:<50}: {dims:<16}({numel:8})"))
        .collect();

    format!(
        "\n {:.1}M total parameters \n ----- \n \n{}",
        total as f64 / 1_000_000.0,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::gnn::{GatStack, GatStackConfig};
    use rand::Rng;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.momentum - TrainConfig::MOMENTUM).abs() < 1e-7);
        assert_eq!(config.reduced_lr_prefixes, vec!["roi_fmap".to_string()]);
    }

    #[test]
    fn test_config_json_defaults_missing_fields() {
        let config = TrainConfig::from_json_str(r#"{"l2": 0.0005, "seed": 7}"#).expect("valid");
        assert!((config.l2 - 5e-4).abs() < 1e-9);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.steps, TrainConfig::default().steps);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = TrainConfig {
            steps: vec![3, 8],
            reduced_lr_prefixes: vec![],
            ..TrainConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(TrainConfig::from_json_str(&json).expect("parse"), config);
    }

    #[test]
    fn test_config_rejects_out_of_range_values() {
        for json in [
            r#"{"lr": 0.0}"#,
            r#"{"l2": -1.0}"#,
            r#"{"momentum": 1.0}"#,
            r#"{"lr_decay": 0.0}"#,
            r#"{"lr_decay": 1.5}"#,
            r#"{"clip": -5.0}"#,
        ] {
            assert!(
                matches!(
                    TrainConfig::from_json_str(json),
                    Err(RelGatError::InvalidHyperparameter { .. })
                ),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_malformed_json() {
        assert!(matches!(
            TrainConfig::from_json_str("{lr: }"),
            Err(RelGatError::Serialization(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"lr": 0.05}"#).expect("write");
        let config = TrainConfig::from_json_file(&path).expect("load");
        assert!((config.lr - 0.05).abs() < 1e-7);
        assert!(TrainConfig::from_json_file(dir.path().join("none.json")).is_err());
    }

    #[test]
    fn test_config_rng_follows_seed() {
        let config = TrainConfig {
            seed: Some(11),
            ..TrainConfig::default()
        };
        let mut from_config = config.rng();
        let mut direct = seeded_rng(11);
        let a: Vec<u32> = (0..4).map(|_| from_config.gen()).collect();
        let b: Vec<u32> = (0..4).map(|_| direct.gen()).collect();
        assert_eq!(a, b);

        // unseeded runs still get a usable stream
        let _: f32 = TrainConfig::default().rng().gen();
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut first = seeded_rng(11);
        let mut second = seeded_rng(11);
        let a: Vec<u32> = (0..4).map(|_| first.gen()).collect();
        let b: Vec<u32> = (0..4).map(|_| second.gen()).collect();
        assert_eq!(a, b);
        let mut other = seeded_rng(12);
        assert_ne!(a[0], other.gen::<u32>());
    }

    #[test]
    fn test_set_mode_toggles_stack() {
        let mut stack =
            GatStack::with_seed(GatStackConfig::new(4, 4, 2, 2, 2).with_heads(2), Some(0))
                .expect("valid config");
        set_mode(&mut stack, true);
        assert!(stack.training());
        set_mode(&mut stack, false);
        assert!(!stack.training());
    }

    #[test]
    fn test_is_bias_or_norm() {
        assert!(is_bias_or_norm("convs.0.bias"));
        assert!(is_bias_or_norm("bns.1.weight"));
        assert!(!is_bias_or_norm("convs.0.lin_l.weight"));
        assert!(!is_bias_or_norm("convs.0.att_e"));
    }

    #[test]
    fn test_parameter_summary() {
        let stack = GatStack::with_seed(GatStackConfig::new(4, 4, 2, 2, 2).with_heads(2), Some(0))
            .expect("valid config");
        let summary = parameter_summary(&stack);

        assert!(summary.contains("M total parameters"));
        assert!(summary.contains("convs.0.lin_l.weight"));
        assert!(summary.contains("[8,6]"));
        assert!(!summary.contains("convs.0.bias"));
        assert!(!summary.contains("bns.0"));

        // largest tensors first
        let lin_l = summary.find("convs.0.lin_l.weight").expect("listed");
        let att_l = summary.find("convs.0.att_l").expect("listed");
        assert!(lin_l < att_l);
    }
}
