//! # nlquery
//!
//! **A natural-language front door for database administration.**
//!
//! nlquery classifies free-text requests ("drop table staging.payments",
//! "how many rows in orders") into a closed set of catalog-defined intents,
//! validates the extracted arguments against schema metadata, gates the
//! result behind a risk policy, and renders a parameterized SQL statement
//! for an external executor. It never generates free-form SQL and never
//! executes anything itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  ┌─────────┐  ┌──────────┐  ┌──────────┐
//! │Normalizer │─▶│  Rules  │─▶│ Semantic │─▶│ Fallback │
//! └───────────┘  └────┬────┘  └────┬─────┘  └────┬─────┘
//!                     └─────────┬──┴─────────────┘
//!                               ▼
//!                        ┌────────────┐  ┌───────────┐  ┌──────────┐
//!                        │ Slot Filler│─▶│ Risk Gate │─▶│ Renderer │
//!                        └──────┬─────┘  └─────┬─────┘  └────┬─────┘
//!                               └───────────┬──┴─────────────┘
//!                                           ▼
//!                                     ┌───────────┐
//!                                     │   Audit   │
//!                                     └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **normalizer** folds case, strips punctuation noise, expands
//!    abbreviations, and corrects bounded typos — quoted literals pass
//!    through verbatim.
//! 2. The **rule matcher** evaluates the catalog's trigger patterns in
//!    priority order; first match wins with confidence 1.0.
//! 3. The **semantic matcher** embeds the normalized text and compares it
//!    against cached exemplar vectors; near-ties become clarifications.
//! 4. The **fallback arbitrator** (feature-flagged, quota-capped) asks an
//!    external completion service for a schema-conforming candidate; any
//!    nonconforming answer counts as no candidate.
//! 5. The **slot filler** resolves and validates arguments against schema
//!    metadata, producing an action, a clarification, or an unknown.
//! 6. The **risk gate** maps the intent to its catalog-declared tier;
//!    medium and high tiers require explicit confirmation.
//! 7. The **renderer** emits the intent's fixed SQL template with bound
//!    parameters and schema-validated, dialect-quoted identifiers.
//! 8. The **audit logger** appends one immutable record per request.
//!
//! The pure pipeline logic lives in the `nlquery-core` crate; this crate
//! adds configuration, the catalog loader with atomic hot-reload, HTTP
//! embedding/completion providers, audit sinks, and the `nlq` CLI.

pub mod audit_sink;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod loader;
pub mod pipeline;
