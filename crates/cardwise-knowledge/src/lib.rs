//! # Cardwise Knowledge
//!
//! The retrieval side of the system.
//!
//! ## How it works
//! ```text
//! credit_cards.json ──► catalog::load_documents ──► Vec<Document>
//!                                                   │
//!                                  VectorIndex::build (embed once)
//!                                                   │
//! query ──► VectorIndex::search(query, k) ──► top-k by cosine similarity
//! ```

pub mod catalog;
pub mod index;

pub use catalog::{CatalogRecord, load_catalog_file, load_documents};
pub use index::VectorIndex;
