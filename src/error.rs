//! Rich diagnostic error types for kg-align.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so users know what went wrong and how to
//! fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for kg-align.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum AlignError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),
}

// ---------------------------------------------------------------------------
// Tensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TensorError {
    #[error("shape mismatch in {op}: {left:?} vs {right:?}")]
    #[diagnostic(
        code(kg_align::tensor::shape_mismatch),
        help(
            "Both operands must have compatible shapes. \
             Check that embeddings of both graphs share the same dimension."
        )
    )]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("buffer of length {len} cannot form a {rows}x{cols} matrix")]
    #[diagnostic(
        code(kg_align::tensor::bad_buffer),
        help("The data length must equal rows * cols.")
    )]
    BadBuffer { rows: usize, cols: usize, len: usize },

    #[error("row index {index} out of bounds for {rows} rows")]
    #[diagnostic(
        code(kg_align::tensor::index),
        help("An entity or relation id exceeds the size of its embedding table.")
    )]
    IndexOutOfBounds { index: usize, rows: usize },

    #[error("backward requires a scalar loss, got shape {shape:?}")]
    #[diagnostic(
        code(kg_align::tensor::non_scalar_loss),
        help("Reduce the loss with `sum` or `mean` before calling backward.")
    )]
    NonScalarLoss { shape: (usize, usize) },
}

// ---------------------------------------------------------------------------
// Data errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DataError {
    #[error("failed to read {path}: {source}")]
    #[diagnostic(
        code(kg_align::data::io),
        help(
            "The data directory must contain ent_ids_1, ent_ids_2, rel_ids_1, rel_ids_2, \
             triples_1, triples_2 and ref_ent_ids."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    #[diagnostic(
        code(kg_align::data::parse),
        help("Lines are tab-separated: `id<TAB>name`, `h<TAB>r<TAB>t` or `sr<TAB>tg`.")
    )]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("unknown {kind} id {id} in {context}")]
    #[diagnostic(
        code(kg_align::data::unknown_id),
        help("Every id referenced by a triple or alignment must be declared in the id files.")
    )]
    UnknownId {
        kind: &'static str,
        id: u64,
        context: String,
    },

    #[error("no seed alignment pairs available")]
    #[diagnostic(
        code(kg_align::data::no_seeds),
        help("Increase `train_ratio` or provide more pairs in ref_ent_ids.")
    )]
    NoSeeds,
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("unknown parameter: {name}")]
    #[diagnostic(
        code(kg_align::model::unknown_param),
        help("The parameter store does not contain this name; the checkpoint may be from another architecture.")
    )]
    UnknownParam { name: String },

    #[error("parameter {name} has shape {found:?}, expected {expected:?}")]
    #[diagnostic(
        code(kg_align::model::shape_mismatch),
        help(
            "The stored values or gradient do not fit this parameter. \
             Check that `dim`, `nheads` and `num_layer` match the checkpoint."
        )
    )]
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("assignment failed: {message}")]
    #[diagnostic(
        code(kg_align::model::assignment),
        help("Similarity matrices must be non-empty and contain only finite values.")
    )]
    Assignment { message: String },

    #[error("training diverged at epoch {epoch}: loss is {loss}")]
    #[diagnostic(
        code(kg_align::model::diverged),
        help("Lower the learning rate or the margin `gamma`.")
    )]
    Diverged { epoch: usize, loss: f32 },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(kg_align::config::invalid),
        help("Check the TrainConfig fields. {message}")
    )]
    Invalid { message: String },

    #[error("failed to read config {path}: {source}")]
    #[diagnostic(
        code(kg_align::config::read),
        help("Ensure the configuration file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    #[diagnostic(
        code(kg_align::config::write),
        help("Ensure the output directory is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(kg_align::config::parse),
        help("The file must be valid TOML with TrainConfig field names.")
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    #[diagnostic(
        code(kg_align::checkpoint::io),
        help("Check that the run directory exists and has correct permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(kg_align::checkpoint::serde),
        help(
            "Failed to encode or decode the checkpoint. \
             The file may be truncated or written by an incompatible version."
        )
    )]
    Serialization { message: String },

    #[error("checkpoint does not match data set: {message}")]
    #[diagnostic(
        code(kg_align::checkpoint::mismatch),
        help("Evaluate a checkpoint against the same data directory it was trained on.")
    )]
    Mismatch { message: String },
}

/// Convenience alias for functions returning kg-align results.
pub type AlignResult<T> = std::result::Result<T, AlignError>;
