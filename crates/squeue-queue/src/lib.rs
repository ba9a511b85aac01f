//! Lease-based work queue over a relational table.
//!
//! Producers [`SqlQueue::put`] rows; workers loop [`SqlQueue::claim`],
//! [`SqlQueue::fetch`] and [`SqlQueue::finish`]; an operator or sidecar
//! periodically runs [`SqlQueue::recover_expired`] and, rarely,
//! [`SqlQueue::force_destroy`]. All coordination is delegated to the
//! backing store's transactions and locks; nothing is cached in process.

pub mod correlation;
pub mod destroy;
pub mod error;
pub mod host;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod schema;
pub mod sweeper;
pub mod worker;

#[cfg(test)]
mod pg_tests;
#[cfg(test)]
mod testing;

pub use correlation::HostCorrelation;
pub use error::{QueueError, QueueResult};
pub use queue::SqlQueue;
pub use recovery::LeaseTimeouts;
pub use registry::QueueRegistry;
pub use schema::create_table;
pub use sweeper::{ResubmitPolicy, SweepReport, Sweeper};
pub use worker::{JobHandler, Worker, WorkerConfig};
