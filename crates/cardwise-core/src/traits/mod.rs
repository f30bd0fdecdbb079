//! Service seams. The orchestration layer only ever talks to these traits,
//! so real clients and test doubles are interchangeable.

pub mod embedder;
pub mod provider;
pub mod retriever;

pub use embedder::Embedder;
pub use provider::{GenerateParams, Provider, ToolChoice};
pub use retriever::Retriever;
