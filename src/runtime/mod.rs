//! Runtime adapters and the scheduler facade.

pub mod scheduler;
pub mod spawn;

pub use scheduler::{lifecycle, Scheduler};
pub use spawn::{Spawn, TokioSpawner};
