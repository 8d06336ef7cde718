//! Cluster coordination stores for a distributed actor runtime.
//!
//! Three stores share one database session and one statement catalog:
//!
//! - [`MembershipStore`]: the cluster membership table, guarded by a
//!   monotonically versioned single-row compare-and-swap.
//! - [`ReminderStore`]: durable actor timers, partitioned by consistent
//!   hash so ring ranges scan a bounded set of partitions.
//! - [`GrainStateStore`]: persisted actor state with etag-based optimistic
//!   concurrency and pluggable serialization.
//!
//! All three speak to the database through the [`Session`] trait; the
//! bundled [`MemorySession`] implements it in-process for tests and local
//! development.

pub mod error;
pub mod mem;
pub mod membership;
pub mod reminders;
pub mod serialization;
pub mod session;
pub mod state;
pub mod statements;

pub use error::{StoreError, StoreResult};
pub use mem::MemorySession;
pub use membership::{
    GatewayEndpoint, MembershipEntry, MembershipSnapshot, MembershipStore, SiloAddress,
    SiloStatus, TableVersion,
};
pub use reminders::{ReminderEntry, ReminderStore};
pub use serialization::{
    DEFAULT_SERIALIZER_CODE, SerializationProvider, SerializerRegistry,
};
pub use session::{
    APPLIED_COLUMN, BoundStatement, Consistency, PreparedStatement, Row, RowSet, Session, Value,
};
pub use state::{GrainStateStore, VersionedState};
pub use statements::{REQUIRED_STATEMENTS, StatementCache, StatementSet};
