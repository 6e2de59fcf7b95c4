use std::sync::Arc;

use crate::pool::{Pool, Priority, QueueHandle};

/// Submission front-end for order-independent tasks dispatched through a
/// shared [`Pool`].
///
/// Any number of `ConcurrentQueue`s may coexist against the same pool; each
/// owns its own [`QueueHandle`] so their task counters and cancellation
/// flags never interfere with one another (see [`ConcurrentQueue::cancel`]).
///
/// # Examples
///
/// ```
/// use concurrency_core::ConcurrentQueue;
///
/// let q = ConcurrentQueue::new();
/// for i in 0..16 {
/// 	q.enqueue(move || {
/// 		println!("task {i}");
/// 	});
/// }
/// q.wait();
/// ```
#[derive(Debug)]
pub struct ConcurrentQueue {
	pool: Arc<Pool>,
	handle: QueueHandle,
}

impl ConcurrentQueue {
	/// Binds to the process-wide shared pool at [`Priority::Normal`].
	#[must_use]
	pub fn new() -> Self {
		Self::with_pool(Pool::default(), "concurrent-queue", Priority::Normal)
	}

	/// Binds to the process-wide shared pool with a custom label and
	/// priority.
	#[must_use]
	pub fn with(label: impl Into<String>, priority: Priority) -> Self {
		Self::with_pool(Pool::default(), label, priority)
	}

	/// Binds to an explicitly supplied pool. Useful for tests that want an
	/// isolated pool rather than the shared default.
	#[must_use]
	pub fn with_pool(pool: Arc<Pool>, label: impl Into<String>, priority: Priority) -> Self {
		let handle = Pool::new_handle(label, priority);
		Self { pool, handle }
	}

	/// Packages `f` as a task and submits it to the pool.
	pub fn enqueue<F: FnOnce() + Send + 'static>(&self, f: F) {
		self.pool.submit_to(&self.handle, f);
	}

	/// Performs one pool dequeue-and-run step on the calling thread. A no-op
	/// if every priority band is currently empty.
	pub fn steal(&self) {
		self.pool.steal();
	}

	/// Cooperative drain: blocks until every task submitted through this
	/// queue has executed or been discarded, helping the pool execute tasks
	/// (from any queue) while it waits.
	pub fn wait(&self) {
		self.pool.drain(&self.handle);
	}

	/// Discards every task currently queued under this handle, then waits
	/// for any already-executing task bound to it to finish. The queue is
	/// left in a fully reusable state: further [`enqueue`](Self::enqueue)
	/// calls behave normally.
	pub fn cancel(&self) {
		self.pool.cancel(&self.handle);
	}

	/// Current number of tasks bound to this queue that are pending or
	/// executing.
	pub fn pending(&self) -> isize {
		self.handle.pending()
	}
}

impl Default for ConcurrentQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for ConcurrentQueue {
	fn drop(&mut self) {
		self.wait();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{
		sync::{atomic::{AtomicUsize, Ordering}, Mutex},
		thread,
		time::Duration,
	};

	#[test]
	fn cooperative_drain_runs_some_tasks_on_caller_thread() {
		let pool = Pool::new(2);
		let q = ConcurrentQueue::with_pool(pool, "drain-test", Priority::Normal);
		let counter = Arc::new(AtomicUsize::new(0));
		let caller_thread = thread::current().id();
		let ran_on_caller = Arc::new(AtomicUsize::new(0));

		for _ in 0..10_000 {
			let counter = counter.clone();
			let ran_on_caller = ran_on_caller.clone();
			q.enqueue(move || {
				counter.fetch_add(1, Ordering::SeqCst);
				if thread::current().id() == caller_thread {
					ran_on_caller.fetch_add(1, Ordering::SeqCst);
				}
			});
		}
		q.wait();

		assert_eq!(counter.load(Ordering::SeqCst), 10_000);
		assert!(ran_on_caller.load(Ordering::SeqCst) > 0);
	}

	#[test]
	fn cancel_stops_pending_but_not_in_flight() {
		let pool = Pool::new(4);
		let q = ConcurrentQueue::with_pool(pool, "cancel-test", Priority::Normal);
		let counter = Arc::new(AtomicUsize::new(0));
		for _ in 0..1000 {
			let counter = counter.clone();
			q.enqueue(move || {
				thread::sleep(Duration::from_millis(10));
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}
		thread::sleep(Duration::from_millis(5));
		q.cancel();
		assert_eq!(q.pending(), 0);
		assert!(counter.load(Ordering::SeqCst) < 1000);

		let after = Arc::new(AtomicUsize::new(0));
		let after2 = after.clone();
		q.enqueue(move || {
			after2.fetch_add(1, Ordering::SeqCst);
		});
		q.wait();
		assert_eq!(after.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn drop_waits_for_in_flight_work() {
		let pool = Pool::new(2);
		let result = Arc::new(Mutex::new(0));
		{
			let q = ConcurrentQueue::with_pool(pool, "drop-test", Priority::Normal);
			let result = result.clone();
			q.enqueue(move || {
				*result.lock().unwrap() = 42;
			});
		}
		assert_eq!(*result.lock().unwrap(), 42);
	}
}
