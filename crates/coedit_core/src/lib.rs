#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Error (common error types)
pub mod error;

/// CRDT-backed post synchronization
pub mod crdt;
