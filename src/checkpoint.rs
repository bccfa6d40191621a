//! Model snapshots.
//!
//! A checkpoint is the bincode encoding of the parameter store together with
//! the configuration it was trained with and the sizes of both graphs as
//! training saw them, so it can be checked against a data set before loading.

use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;
use crate::error::{AlignResult, CheckpointError};
use crate::kg::CrossGraph;
use crate::model::GatNet;
use crate::nn::ParamStore;

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Entity, relation and triple counts of both graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSizes {
    pub entities_sr: usize,
    pub entities_tg: usize,
    pub relations_sr: usize,
    pub relations_tg: usize,
    /// Triples after graph completion, if any.
    pub triples_sr: usize,
    pub triples_tg: usize,
}

impl GraphSizes {
    pub fn of(data: &CrossGraph) -> Self {
        Self {
            entities_sr: data.source.num_entities(),
            entities_tg: data.target.num_entities(),
            relations_sr: data.source.num_relations(),
            relations_tg: data.target.num_relations(),
            triples_sr: data.source.triples().len(),
            triples_tg: data.target.triples().len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: TrainConfig,
    pub sizes: GraphSizes,
    /// Epochs trained when the snapshot was taken.
    pub epoch: usize,
    pub params: ParamStore,
}

impl Checkpoint {
    pub fn new(config: &TrainConfig, data: &CrossGraph, model: &GatNet, epoch: usize) -> Self {
        Self {
            config: config.clone(),
            sizes: GraphSizes::of(data),
            epoch,
            params: model.params().clone(),
        }
    }

    pub fn save(&self, path: &Path) -> CheckpointResult<()> {
        let bytes = bincode::serialize(self).map_err(|e| CheckpointError::Serialization {
            message: format!("failed to encode checkpoint: {e}"),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, bytes).map_err(|e| CheckpointError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), epoch = self.epoch, "saved checkpoint");
        Ok(())
    }

    pub fn load(path: &Path) -> CheckpointResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| CheckpointError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        bincode::deserialize(&bytes).map_err(|e| CheckpointError::Serialization {
            message: format!("failed to decode {}: {e}", path.display()),
        })
    }

    /// Fail unless `data` has the graph sizes this checkpoint was trained on.
    pub fn check(&self, data: &CrossGraph) -> CheckpointResult<()> {
        let found = GraphSizes::of(data);
        if found != self.sizes {
            return Err(CheckpointError::Mismatch {
                message: format!("trained on {:?}, data set has {:?}", self.sizes, found),
            });
        }
        Ok(())
    }

    /// Copy the stored parameters into `model`.
    pub fn restore(&self, data: &CrossGraph, model: &mut GatNet) -> CheckpointResult<()> {
        self.check(data)?;
        model
            .params_mut()
            .load_values(&self.params)
            .map_err(|e| CheckpointError::Mismatch {
                message: e.to_string(),
            })
    }

    /// Rebuild the trained network on `data` as loaded from disk.
    ///
    /// `data` goes through the same preparation as in training (graph
    /// completion when the stored config enables it) before the parameters
    /// are restored.
    pub fn restore_model(&self, data: &mut CrossGraph) -> AlignResult<GatNet> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut model = GatNet::for_run(data, &self.config, &mut rng)?;
        self.restore(data, &mut model)?;
        tracing::info!(epoch = self.epoch, sizes = ?self.sizes, "restored model");
        Ok(model)
    }
}
