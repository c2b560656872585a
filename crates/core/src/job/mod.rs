//! Job records and the queue backings that store them.

mod failover;
mod memory_store;
mod sqlite_store;
mod store;
mod types;

pub use failover::FailoverJobStore;
pub use memory_store::MemoryJobStore;
pub use sqlite_store::SqliteJobStore;
pub use store::{JobError, JobStore, NewJob};
pub use types::{
    ConversionOptions, Job, JobInput, JobResultData, JobState, QueueCounts,
};
