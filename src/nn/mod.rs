//! Neural building blocks: parameter storage, embedding tables, GAT encoder.

pub mod embedding;
pub mod gat;
pub mod param;

pub use embedding::{DoubleEmbedding, EmbeddingKind};
pub use gat::{Gat, GatConfig};
pub use param::{Bound, Param, ParamId, ParamStore};
