//! # sqlq
//!
//! Persistent, thread-safe work queues whose backing store is a relational
//! table (SQLite or Postgres) rather than memory.
//!
//! Provides FIFO, FILO and unique-FIFO orderings, immediate or deferred
//! (acknowledged) consumption, and blocking gets with timeouts.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod ordering;
pub mod serializer;
pub mod storage;
pub mod telemetry;

pub use config::QueueOptions;
pub use engine::{GetOptions, Queue};
pub use error::{Error, Result};
pub use model::RawItem;
pub use ordering::QueueKind;
