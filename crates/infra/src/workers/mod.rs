//! Background workers consuming the session queue.

pub mod pool;

pub use pool::{DeliveryOutcome, WorkerContext, WorkerPool, WorkerPoolHandle};
