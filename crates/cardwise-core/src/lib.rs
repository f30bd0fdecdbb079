//! # Cardwise Core
//!
//! Shared vocabulary for every Cardwise crate: configuration, the error
//! taxonomy, conversation/document types, and the service traits that the
//! orchestration layer is wired against (`Provider`, `Embedder`, `Retriever`).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CardwiseConfig;
pub use error::{CardwiseError, Result};
