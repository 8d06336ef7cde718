//! Core domain types for the granary coordination store.
//!
//! This crate defines the pure, database-agnostic pieces shared by the
//! store layer:
//! - Grain identity and its tagged binary key encoding
//! - Uniform hashing and hash-band partition math for reminder sharding
//! - Connection-string configuration
//!
//! Nothing in here performs I/O.

pub mod config;
pub mod error;
pub mod grain;
pub mod hashing;

pub use config::{Compression, ConnectionConfig};
pub use error::{Error, Result};
pub use grain::GrainRef;
pub use hashing::{
    REMINDER_PARTITION_BITS, Sha256Hasher, UniformHasher, partition_of, partitions_for_range,
    rebias_to_signed,
};
