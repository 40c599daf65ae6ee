//! Infrastructure adapters: durable stores and the durable backend worker.

pub mod durable;
pub mod store;

pub use durable::{enqueue_performer, DurableBackend};
pub use store::{DurableStore, JsonlStore, MemoryStore, Performer};
