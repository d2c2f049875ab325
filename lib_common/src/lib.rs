//! # lib_common
//!
//! Shared building blocks for the animal registry servers. Each top-level folder
//! is gated behind a cargo feature of the same name so binaries only pull the
//! dependencies they actually use.
//!
//! - `connections`: PostgreSQL connection pooling.
//! - `core`: the generic fan-out [`core::Dispatcher`] with bounded client queues.
//! - `records`: the animal record model, query engine, mutation pipeline, change
//!   notifier and record store implementations.

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "records")]
pub mod records;
