#![allow(clippy::tabs_in_doc_comments)]

//! Work-dispatch core of a general-purpose computation library: a shared
//! worker-thread pool plus three submission front-ends layered on top of it.
//!
//! - [`Pool`] is a fixed-size, priority-banded worker pool shared by any
//!   number of independent submitters.
//! - [`ConcurrentQueue`] submits order-independent tasks into a [`Pool`] and
//!   offers cooperative draining, stealing, and cancellation.
//! - [`SerialQueue`] runs submitted closures strictly in submission order on
//!   a single dedicated worker thread, independent of any [`Pool`].
//! - [`TicketQueue`] sequences the *completion* of concurrently computed
//!   results in the order their tickets were acquired, without serializing
//!   the work that produces each result.
//!
//! These four pieces compose but never reach into one another's internals;
//! more complex coordination (dependency graphs, cross-process dispatch,
//! work stealing across independent pools) is left to the caller.

mod align;
mod concurrent_queue;
mod pool;
mod serial_queue;
mod ticket_queue;

pub use concurrent_queue::ConcurrentQueue;
pub use pool::{Pool, Priority, QueueHandle};
pub use serial_queue::SerialQueue;
pub use ticket_queue::{Ticket, TicketQueue};
