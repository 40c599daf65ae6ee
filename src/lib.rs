//! # Taskhook
//!
//! An in-process deferred-work scheduler built around named events.
//!
//! This library couples a named event/handler registry with a priority task
//! queue, a dispatcher loop, and a bounded pool of OS worker threads. Code
//! anywhere in the process can enqueue work by event name; the dispatcher
//! pops records in priority order and fans each one out to every handler
//! attached to that name.
//!
//! ## Core Pieces
//!
//! - **Event Registry**: named events with ordered handler lists; handlers
//!   run lowest priority value first, attach order breaking ties
//! - **Task Queue**: an in-memory min-ordered priority queue with stable
//!   FIFO behavior inside a priority class
//! - **Dispatcher**: a poll/sleep loop that snapshots handlers at dequeue
//!   time and isolates per-handler failures
//! - **Worker Pool**: dedicated OS threads for blocking handlers, so
//!   synchronous work never stalls the async runtime
//! - **Durable Backend**: an optional store-backed sink whose records
//!   survive process restarts
//!
//! ## Handler Kinds
//!
//! Every handler is tagged at construction as either *cooperative* (async,
//! runs on the dispatching task) or *blocking* (synchronous, always shipped
//! to the worker pool):
//!
//! ```rust,no_run
//! use taskhook::builders::SchedulerBuilder;
//! use taskhook::config::SchedulerConfig;
//! use taskhook::core::{Handler, TaskArgs};
//! use taskhook::runtime::TokioSpawner;
//!
//! # async fn demo() -> Result<(), taskhook::core::SchedulerError> {
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::default()).build()?;
//!
//! scheduler.on("send_email", 0, Handler::blocking(|_args| {
//!     // synchronous work, runs on a pool thread
//!     Ok(())
//! }));
//! scheduler.on("send_email", 10, Handler::cooperative(|_args| async move {
//!     // async work, runs on the dispatching task
//!     Ok(())
//! }));
//!
//! scheduler.start(&TokioSpawner::current()).await?;
//! scheduler.put("send_email", TaskArgs::new().kw("to", "a@b.c"), 0)?;
//! scheduler.drain().await;
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling components: registry, queue, dispatcher, worker pool.
pub mod core;
/// Configuration models for the scheduler.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters: durable stores and the durable backend worker.
pub mod infra;
/// Runtime adapters and the scheduler facade.
pub mod runtime;
/// Shared utilities.
pub mod util;
