//! Core types and the matching/merging engine for the Intake custody-record
//! reconciler.
//!
//! This crate is deliberately free of async-runtime and database
//! dependencies. It turns raw source records into a typed entity graph,
//! reconciles that graph against the persisted one for the same
//! jurisdiction, and stages the resulting writes. Persistence backends
//! implement [`store::GraphStore`]; orchestration lives in `intake-pipeline`.

pub mod entity;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod merge;
pub mod normalize;
pub mod reconcile;
pub mod store;
pub mod warning;

pub use error::{Error, Result};
