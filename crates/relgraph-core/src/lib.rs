//! relgraph-core library.
//!
//! Relation consistency and propagation between business partners:
//!
//! - [`validity`] validates the validity-state list of a staged relation.
//! - [`staged`] owns tenant-scoped Input/Output relation stages.
//! - [`canonical`] keeps the canonical legal-entity relation graph.
//! - [`propagation`] routes canonical upserts through per-type strategies,
//!   closing `IsAlternativeHeadquarterFor` groups transitively.
//!
//! # Conventions
//!
//! - **Errors**: domain operations return [`RelationError`]; setup and config
//!   use `anyhow::Result`.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod canonical;
pub mod changelog;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod propagation;
pub mod sharing;
pub mod staged;
pub mod validity;

pub use canonical::{RelationUpsertService, UpsertKind, UpsertRequest, UpsertResult};
pub use error::{ErrorCode, RelationError};
pub use propagation::{RelationUpsertStrategy, strategy_for, upsert_relation};
pub use staged::StagedRelationService;
