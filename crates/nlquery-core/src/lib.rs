//! # nlquery Core
//!
//! Pure classification pipeline for nlquery: text normalization, the intent
//! catalog, rule and semantic matching, the guarded fallback stage, slot
//! resolution, the risk/policy gate, parameterized SQL rendering, and audit
//! records.
//!
//! This crate contains no tokio runtime, no filesystem I/O, and no network
//! dependencies. External collaborators (embedding service, completion
//! service, schema catalog, audit sink) are consumed through traits; the
//! application crate provides the concrete implementations.

pub mod audit;
pub mod catalog;
pub mod dsl;
pub mod embedding;
pub mod fallback;
pub mod normalize;
pub mod render;
pub mod risk;
pub mod rules;
pub mod schema;
pub mod semantic;
pub mod slots;
