#![warn(missing_docs)]
#![deny(
    clippy::disallowed_types,
    clippy::await_holding_refcell_ref,
    clippy::await_holding_lock
)]
#![allow(clippy::type_complexity)]

//! Data model and serialization schemas shared by the Strata voxel engine:
//! strongly typed coordinates, block state and registry types, chunk storage
//! and the persistence wire types (regions, spans, snapshots).

pub mod coordinates;
pub mod region;
pub mod voxel;

/// Default namespace for Strata's registry objects (as a `const` for compile-time functions)
pub const STRATA_DOMAIN_CONST: &str = "strata";
/// Default namespace for Strata's registry objects
pub static STRATA_DOMAIN: &str = STRATA_DOMAIN_CONST;
