// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kg-align
//!
//! Cross-lingual knowledge-graph entity alignment with a shared graph
//! attention encoder, a TransE relation objective and assignment-based
//! bootstrapping.
//!
//! ## Architecture
//!
//! - **Tensors** (`tensor`): dense row-major `f32` matrices, rayon distance kernels
//! - **Autograd** (`autograd`): reverse-mode tape with sparse attention ops
//! - **Knowledge graphs** (`kg`): vocabularies, triples, DBP15k loader, completion
//! - **Network** (`nn`, `model`): embedding tables, sparse multi-head GAT, `GatNet`
//! - **Training** (`loss`, `optim`, `train`): margin losses, Adagrad/Adam/SGD, schedule
//! - **Alignment** (`neighbors`, `assignment`, `eval`): hard negatives,
//!   Hungarian matching, Hits@k/MRR
//!
//! ## Library usage
//!
//! ```no_run
//! use kg_align::config::TrainConfig;
//! use kg_align::kg::load::load_cross_graph;
//! use kg_align::train::Trainer;
//!
//! let config = TrainConfig::default();
//! let data = load_cross_graph("data/dbp15k/zh_en".as_ref(), config.train_ratio, config.seed).unwrap();
//! let mut trainer = Trainer::new(config, data).unwrap();
//! let summary = trainer.train().unwrap();
//! println!("{:?}", summary.report);
//! ```

pub mod assignment;
pub mod autograd;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod eval;
pub mod kg;
pub mod loss;
pub mod model;
pub mod neighbors;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod train;
