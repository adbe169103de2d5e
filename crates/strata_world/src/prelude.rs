//! Common type aliases

// some of the imports here are not used yet, but are pre-defined for symmetry
#![allow(unused)]

// Common synchronization/cell types
pub use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
pub use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};

// hashbrown Hash* types
pub use hashbrown::{HashMap, HashSet};
