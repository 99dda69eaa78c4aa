//! Store backend implementations

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;
