//! First-order optimisers with the semantics of their PyTorch namesakes.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::nn::{ParamId, ParamStore};
use crate::tensor::Matrix;

const ADAGRAD_EPS: f32 = 1e-10;
const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;

/// Update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    #[default]
    Adagrad,
    Adam,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Sgd => write!(f, "SGD"),
            OptimizerKind::Adagrad => write!(f, "Adagrad"),
            OptimizerKind::Adam => write!(f, "Adam"),
        }
    }
}

#[derive(Debug, Clone)]
struct SlotState {
    /// Adagrad: sum of squared gradients. Adam: first moment.
    first: Matrix,
    /// Adam: second moment.
    second: Option<Matrix>,
}

/// Optimiser over a [`ParamStore`].
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f32,
    l2_penalty: f32,
    steps: u32,
    state: Vec<Option<SlotState>>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f32, l2_penalty: f32) -> Self {
        Self {
            kind,
            learning_rate,
            l2_penalty,
            steps: 0,
            state: Vec::new(),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Move the state of `id` out, creating it on first use.
    fn take_slot(&mut self, id: ParamId, shape: (usize, usize)) -> Option<SlotState> {
        if self.kind == OptimizerKind::Sgd {
            return None;
        }
        if self.state.len() <= id.index() {
            self.state.resize(id.index() + 1, None);
        }
        let adam = self.kind == OptimizerKind::Adam;
        let slot = self.state[id.index()].take().unwrap_or_else(|| SlotState {
            first: Matrix::zeros(shape.0, shape.1),
            second: adam.then(|| Matrix::zeros(shape.0, shape.1)),
        });
        Some(slot)
    }

    /// Apply one update from `grads` (as produced by [`crate::nn::Bound::collect`]).
    pub fn step(
        &mut self,
        store: &mut ParamStore,
        grads: Vec<(ParamId, Matrix)>,
    ) -> Result<(), ModelError> {
        self.steps += 1;
        let t = self.steps as i32;
        let lr = self.learning_rate;
        let l2 = self.l2_penalty;
        let kind = self.kind;
        let bias1 = 1.0 - ADAM_BETA1.powi(t);
        let bias2 = 1.0 - ADAM_BETA2.powi(t);

        for (id, grad) in grads {
            let sparse = store.get(id).sparse;
            let shape = store.value(id).shape();
            if grad.shape() != shape {
                return Err(ModelError::ShapeMismatch {
                    name: store.get(id).name.clone(),
                    expected: shape,
                    found: grad.shape(),
                });
            }
            let cols = shape.1;
            let mut slot = self.take_slot(id, shape);
            let weights = store.value_mut(id);

            for r in 0..shape.0 {
                if sparse && grad.row_is_zero(r) {
                    continue;
                }
                for c in 0..cols {
                    let idx = r * cols + c;
                    let w = weights.data()[idx];
                    let g = grad.data()[idx] + l2 * w;
                    let update = match (&mut slot, kind) {
                        (None, _) | (_, OptimizerKind::Sgd) => lr * g,
                        (Some(s), OptimizerKind::Adagrad) => {
                            let acc = &mut s.first.data_mut()[idx];
                            *acc += g * g;
                            lr * g / (acc.sqrt() + ADAGRAD_EPS)
                        }
                        (Some(s), OptimizerKind::Adam) => {
                            let m = &mut s.first.data_mut()[idx];
                            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                            let m_hat = *m / bias1;
                            let v_hat = match &mut s.second {
                                Some(second) => {
                                    let v = &mut second.data_mut()[idx];
                                    *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                                    *v / bias2
                                }
                                None => 0.0,
                            };
                            lr * m_hat / (v_hat.sqrt() + ADAM_EPS)
                        }
                    };
                    weights.data_mut()[idx] = w - update;
                }
            }
            if let Some(slot) = slot {
                self.state[id.index()] = Some(slot);
            }
        }
        Ok(())
    }
}
