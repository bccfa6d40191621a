//! Training configuration.
//!
//! Defaults reproduce the reference DBP15k run: 128-dimensional embeddings,
//! a two-layer two-head GAT, margin 3.0, Adagrad at 0.005 with sparse
//! embedding updates. Every field may be overridden from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::kg::adjacency::EdgeWeighting;
use crate::nn::GatConfig;
use crate::optim::OptimizerKind;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Hyper-parameters and run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Embedding and hidden dimension.
    pub dim: usize,
    /// Attention heads per GAT layer.
    pub nheads: usize,
    /// Number of GAT layers.
    pub num_layer: usize,
    /// Margin of both ranking losses.
    pub gamma: f32,
    /// Weight of the TransE loss.
    pub beta: f32,
    /// Alignment pairs per optimiser step.
    pub batch_size: usize,
    pub dropout: f32,
    /// LeakyReLU slope inside the attention.
    pub alpha: f32,
    /// Threads used for nearest-neighbour search.
    pub num_workers: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
    pub optimizer: OptimizerKind,
    /// Only update embedding rows that received a gradient.
    pub sparse: bool,
    /// Shuffle pairs and triples every epoch.
    pub shuffle: bool,
    /// Train TransE against corrupted triples instead of minimising the
    /// residual of true triples only.
    pub corrupt: bool,
    /// Transfer aligned triples between the graphs before training.
    pub graph_completion: bool,
    /// Add a self loop to every entity in the attention graph.
    pub self_loops: bool,
    pub edge_weighting: EdgeWeighting,
    pub epochs: usize,
    /// Negatives per positive pair.
    pub nn_num: usize,
    /// Epochs between nearest-neighbour refreshes; 0 keeps random negatives.
    pub nn_interval: usize,
    /// Epochs between bootstrap rounds; 0 disables bootstrapping.
    pub bootstrap_interval: usize,
    /// Minimum cosine similarity for a matched pair to become a pseudo-label.
    pub bootstrap_threshold: f32,
    /// Epochs between evaluations; 0 evaluates only at the end.
    pub eval_interval: usize,
    pub top_k: Vec<usize>,
    /// Share of `ref_ent_ids` used as seed alignment.
    pub train_ratio: f32,
    pub seed: u64,
    /// Name of the run directory, also logged with every run.
    pub run_name: String,
    /// Where run directories are created; `None` writes nothing to disk.
    pub output_dir: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dim: 128,
            nheads: 2,
            num_layer: 2,
            gamma: 3.0,
            beta: 1.0,
            batch_size: 4500,
            dropout: 0.0,
            alpha: 0.2,
            num_workers: 4,
            learning_rate: 0.005,
            l2_penalty: 0.0,
            optimizer: OptimizerKind::Adagrad,
            sparse: true,
            shuffle: true,
            corrupt: false,
            graph_completion: false,
            self_loops: true,
            edge_weighting: EdgeWeighting::Uniform,
            epochs: 1000,
            nn_num: 25,
            nn_interval: 10,
            bootstrap_interval: 0,
            bootstrap_threshold: 0.75,
            eval_interval: 10,
            top_k: vec![1, 10],
            train_ratio: 0.3,
            seed: 2018,
            run_name: "NegaTriple".into(),
            output_dir: None,
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

impl TrainConfig {
    /// Reject settings training cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dim == 0 {
            return Err(invalid("dim must be > 0"));
        }
        if self.nheads == 0 || self.num_layer == 0 {
            return Err(invalid("nheads and num_layer must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be > 0"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid("dropout must be in [0, 1)"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("learning_rate must be > 0"));
        }
        if self.gamma < 0.0 || self.beta < 0.0 || self.l2_penalty < 0.0 {
            return Err(invalid("gamma, beta and l2_penalty must be >= 0"));
        }
        if self.num_workers == 0 {
            return Err(invalid("num_workers must be > 0"));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return Err(invalid("train_ratio must be in (0, 1]"));
        }
        if self.top_k.is_empty() || self.top_k.contains(&0) {
            return Err(invalid("top_k must list positive cut-offs"));
        }
        if !(-1.0..=1.0).contains(&self.bootstrap_threshold) {
            return Err(invalid("bootstrap_threshold is a cosine similarity in [-1, 1]"));
        }
        if self.run_name.trim().is_empty() {
            return Err(invalid("run_name must not be empty"));
        }
        Ok(())
    }

    pub fn gat(&self) -> GatConfig {
        GatConfig {
            dim: self.dim,
            nheads: self.nheads,
            num_layer: self.num_layer,
            dropout: self.dropout,
            alpha: self.alpha,
        }
    }

    /// Directory of this run's artefacts, if writing to disk.
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|d| d.join(&self.run_name))
    }

    /// Load from a TOML file; missing fields keep their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// One `name: value` line per parameter.
    pub fn summary(&self) -> String {
        let output_dir = self
            .output_dir
            .as_ref()
            .map_or_else(|| "-".to_string(), |d| d.display().to_string());
        let rows: [(&str, String); 28] = [
            ("run_name", self.run_name.clone()),
            ("dim", self.dim.to_string()),
            ("nheads", self.nheads.to_string()),
            ("num_layer", self.num_layer.to_string()),
            ("gamma", self.gamma.to_string()),
            ("beta", self.beta.to_string()),
            ("batch_size", self.batch_size.to_string()),
            ("dropout", self.dropout.to_string()),
            ("alpha", self.alpha.to_string()),
            ("num_workers", self.num_workers.to_string()),
            ("learning_rate", self.learning_rate.to_string()),
            ("l2_penalty", self.l2_penalty.to_string()),
            ("optimizer", self.optimizer.to_string()),
            ("sparse", self.sparse.to_string()),
            ("shuffle", self.shuffle.to_string()),
            ("corrupt", self.corrupt.to_string()),
            ("graph_completion", self.graph_completion.to_string()),
            ("self_loops", self.self_loops.to_string()),
            ("edge_weighting", format!("{:?}", self.edge_weighting)),
            ("epochs", self.epochs.to_string()),
            ("nn_num", self.nn_num.to_string()),
            ("nn_interval", self.nn_interval.to_string()),
            ("bootstrap_interval", self.bootstrap_interval.to_string()),
            ("bootstrap_threshold", self.bootstrap_threshold.to_string()),
            ("eval_interval", self.eval_interval.to_string()),
            ("top_k", format!("{:?}", self.top_k)),
            ("train_ratio", self.train_ratio.to_string()),
            ("output_dir", output_dir),
        ];
        let mut out = String::new();
        for (name, value) in rows {
            out.push_str(&format!("{name:>20}: {value}\n"));
        }
        out.push_str(&format!("{:>20}: {}\n", "seed", self.seed));
        out
    }
}
