//! # dimjoin core
//!
//! Joins a stream against a dimension table held entirely in memory.
//!
//! The side table is read in full by a [`ReferenceTableLoader`], published
//! as an immutable [`Snapshot`] behind an atomically swapped pointer, and
//! reloaded once or on a fixed interval by a [`CacheRefresher`]. A
//! [`JoinEngine`] serves every lookup from the current snapshot, by exact
//! key or by key prefix, with inner or left outer semantics.
//!
//! ```text
//! stream row ─▶ RowKeyBuilder ─▶ key ─▶ SnapshotCache ─▶ fill_data ─▶ Collector
//!                                          ▲
//!              ReferenceTableLoader ─▶ CacheRefresher (publish)
//! ```
//!
//! [`ReferenceTableLoader`]: lookup::ReferenceTableLoader
//! [`Snapshot`]: lookup::Snapshot
//! [`CacheRefresher`]: lookup::CacheRefresher
//! [`JoinEngine`]: lookup::JoinEngine

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod lookup;

pub use error::{Error, Result};
