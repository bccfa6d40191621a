//! Named trainable parameters and their binding onto a tape.

use serde::{Deserialize, Serialize};

use crate::autograd::{Gradients, Tape, Var};
use crate::error::ModelError;
use crate::tensor::Matrix;

/// Index of a parameter in a [`ParamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamId(usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One trainable matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: Matrix,
    /// Row-sparse parameters (embedding tables) only update rows that
    /// received a gradient.
    pub sparse: bool,
}

/// All parameters of a model, in registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamStore {
    params: Vec<Param>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: Matrix, sparse: bool) -> ParamId {
        self.params.push(Param {
            name: name.into(),
            value,
            sparse,
        });
        ParamId(self.params.len() - 1)
    }

    pub fn get(&self, id: ParamId) -> &Param {
        &self.params[id.0]
    }

    pub fn value(&self, id: ParamId) -> &Matrix {
        &self.params[id.0].value
    }

    pub fn value_mut(&mut self, id: ParamId) -> &mut Matrix {
        &mut self.params[id.0].value
    }

    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.params.iter().position(|p| p.name == name).map(ParamId)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Param)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId(i), p))
    }

    /// Total number of scalar weights.
    pub fn num_weights(&self) -> usize {
        self.params.iter().map(|p| p.value.len()).sum()
    }

    /// Copy values from `other`, which must hold the same names and shapes.
    pub fn load_values(&mut self, other: &ParamStore) -> Result<(), ModelError> {
        for param in &mut self.params {
            let Some(id) = other.find(&param.name) else {
                return Err(ModelError::UnknownParam {
                    name: param.name.clone(),
                });
            };
            let src = other.value(id);
            if src.shape() != param.value.shape() {
                return Err(ModelError::ShapeMismatch {
                    name: param.name.clone(),
                    expected: param.value.shape(),
                    found: src.shape(),
                });
            }
            param.value = src.clone();
        }
        Ok(())
    }

    /// Place every parameter on `tape` as a leaf.
    pub fn bind(&self, tape: &mut Tape) -> Bound {
        Bound {
            vars: self.params.iter().map(|p| tape.leaf(p.value.clone())).collect(),
        }
    }

    /// Place every parameter on `tape` as a constant (inference only).
    pub fn bind_frozen(&self, tape: &mut Tape) -> Bound {
        Bound {
            vars: self
                .params
                .iter()
                .map(|p| tape.constant(p.value.clone()))
                .collect(),
        }
    }
}

/// Tape handles of a [`ParamStore`]'s parameters.
#[derive(Debug, Clone)]
pub struct Bound {
    vars: Vec<Var>,
}

impl Bound {
    pub fn var(&self, id: ParamId) -> Var {
        self.vars[id.0]
    }

    /// Collect the gradient of every parameter the loss depends on.
    pub fn collect(&self, grads: &mut Gradients) -> Vec<(ParamId, Matrix)> {
        self.vars
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| grads.take(v).map(|g| (ParamId(i), g)))
            .collect()
    }
}
