//! # Cardwise Gateway
//! HTTP surface for the question-answering agent.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
