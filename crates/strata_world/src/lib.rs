#![warn(missing_docs)]
#![deny(
    clippy::disallowed_types,
    clippy::await_holding_refcell_ref,
    clippy::await_holding_lock
)]
#![allow(clippy::type_complexity)]

//! The Strata chunk streaming core.
//!
//! Keeps a bounded working set of voxel chunks resident around a moving
//! observer: a chunk cache and per-coordinate state machine, asynchronous
//! generation and meshing pipelines on fixed worker pools with per-frame
//! application budgets, a region-based persistence backend with an atomic
//! (optionally LZ4-compressed) container format, and an asynchronous region
//! loader with caching, presence probing and prefetching.

pub mod config;
pub mod error;
pub mod persistence;
pub mod prelude;
pub mod storage;
pub mod tasks;
pub mod voxel;
