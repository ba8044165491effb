//! # dimjoin connectors
//!
//! Reference table loaders for `dimjoin-core`: in-memory, Parquet file and
//! `PostgreSQL` (feature `postgres`).

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Reference table loaders - full-table sources for dimension joins
pub mod lookup;
