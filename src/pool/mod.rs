#![allow(clippy::tabs_in_doc_comments)]

use std::{
	fmt,
	panic::{self, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicIsize, Ordering},
		Arc, Condvar, Mutex, OnceLock,
	},
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use crossbeam_queue::SegQueue;
use tracing::{debug, error, trace};

use crate::align::Aligned;

/// Number of priority bands a [`Pool`] dispatches across.
const BAND_COUNT: usize = 3;

/// How long a worker keeps yielding before it parks on the condition variable.
const IDLE_YIELD_THRESHOLD: Duration = Duration::from_micros(1200);

/// Upper bound on how long a parked worker sleeps before re-checking the bands.
const IDLE_SLEEP_TIMEOUT: Duration = Duration::from_millis(120);

/// A task's priority band within a [`Pool`].
///
/// Bands are drained strictly in declaration order: every `High` task queued
/// at the moment of a worker's scan is dequeued before any `Normal` task, and
/// every `Normal` task before any `Low` task. Sustained high-priority load can
/// starve lower bands; this is accepted, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Priority {
	High = 0,
	Normal = 1,
	Low = 2,
}

impl Priority {
	fn band(self) -> usize {
		self as usize
	}
}

type Task = Box<dyn FnOnce() + Send>;

struct QueuedTask {
	handle: Arc<HandleInner>,
	func: Task,
}

struct HandleInner {
	priority: Priority,
	label: String,
	task_counter: Aligned<AtomicIsize>,
	cancelled: Aligned<AtomicBool>,
}

impl fmt::Debug for HandleInner {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueueHandle")
			.field("label", &self.label)
			.field("priority", &self.priority)
			.field("task_counter", &self.task_counter.0.load(Ordering::Relaxed))
			.field("cancelled", &self.cancelled.0.load(Ordering::Relaxed))
			.finish()
	}
}

/// The pool-side identity of a logical group of tasks: a priority, a label for
/// diagnostics, an in-flight task counter, and a cancellation flag.
///
/// A `QueueHandle` never outlives the [`Pool`] it was created from; front-ends
/// such as [`crate::ConcurrentQueue`] enforce this by holding an `Arc<Pool>`
/// (or a borrow) alongside their handle.
#[derive(Debug, Clone)]
pub struct QueueHandle {
	inner: Arc<HandleInner>,
}

impl QueueHandle {
	fn new(label: impl Into<String>, priority: Priority) -> Self {
		Self {
			inner: Arc::new(HandleInner {
				priority,
				label: label.into(),
				task_counter: Aligned(AtomicIsize::new(0)),
				cancelled: Aligned(AtomicBool::new(false)),
			}),
		}
	}

	/// Current number of tasks bound to this handle that are queued or executing.
	pub fn pending(&self) -> isize {
		self.inner.task_counter.0.load(Ordering::Acquire)
	}

	pub fn label(&self) -> &str {
		&self.inner.label
	}

	pub fn priority(&self) -> Priority {
		self.inner.priority
	}
}

/// A fixed-size pool of worker threads dequeuing tasks from three
/// priority-banded queues.
///
/// Constructed with [`Pool::new`], or accessed as a shared process-wide
/// instance via [`Pool::default`]. Dropping a `Pool` stops and joins
/// every worker thread; it is a logic error (enforced by ownership, not a
/// runtime check) for any [`QueueHandle`] to outlive its `Pool`.
pub struct Pool {
	bands: [SegQueue<QueuedTask>; BAND_COUNT],
	stop: Aligned<AtomicBool>,
	mutex: Mutex<()>,
	condvar: Condvar,
	workers: Mutex<Vec<JoinHandle<()>>>,
	static_handle: QueueHandle,
}

impl fmt::Debug for Pool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Pool")
			.field("size", &self.size())
			.field("stop", &self.stop.0.load(Ordering::Relaxed))
			.finish()
	}
}

static DEFAULT_POOL: OnceLock<Arc<Pool>> = OnceLock::new();

impl Pool {
	/// Creates a pool with exactly `size` worker threads.
	///
	/// # Panics
	/// Panics if `size == 0`, or if the OS refuses to spawn one of the worker
	/// threads.
	#[must_use]
	pub fn new(size: usize) -> Arc<Self> {
		assert_ne!(size, 0, "pool size must be greater than 0");

		let pool = Arc::new(Self {
			bands: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
			stop: Aligned(AtomicBool::new(false)),
			mutex: Mutex::new(()),
			condvar: Condvar::new(),
			workers: Mutex::new(Vec::with_capacity(size)),
			static_handle: QueueHandle::new("static", Priority::Normal),
		});

		let mut workers = Vec::with_capacity(size);
		for i in 0..size {
			let pool = pool.clone();
			workers.push(
				thread::Builder::new()
					.name(format!("pool-worker-{i}"))
					.spawn(move || pool.worker_loop())
					.expect("worker thread to be spawned"),
			);
		}
		*pool.workers.lock().unwrap() = workers;

		pool
	}

	/// Returns the process-wide shared pool, lazily constructed with a worker
	/// count of `max(available_parallelism, 1)`.
	pub fn default() -> Arc<Self> {
		DEFAULT_POOL
			.get_or_init(|| {
				let size = thread::available_parallelism()
					.map(|n| n.get())
					.unwrap_or(1);
				Self::new(size)
			})
			.clone()
	}

	/// Number of worker threads.
	pub fn size(&self) -> usize {
		self.workers.lock().unwrap().len()
	}

	/// Creates a new [`QueueHandle`] bound to this pool.
	pub fn new_handle(label: impl Into<String>, priority: Priority) -> QueueHandle {
		QueueHandle::new(label, priority)
	}

	/// Enqueues `func` onto the pool's implicit `"static"`/`Normal` handle.
	pub fn submit<F: FnOnce() + Send + 'static>(&self, func: F) {
		self.submit_to(&self.static_handle, func);
	}

	/// Enqueues `func` onto `handle`.
	pub fn submit_to<F: FnOnce() + Send + 'static>(&self, handle: &QueueHandle, func: F) {
		handle.inner.task_counter.0.fetch_add(1, Ordering::AcqRel);
		let band = handle.inner.priority.band();
		self.bands[band].push(QueuedTask {
			handle: handle.inner.clone(),
			func: Box::new(func),
		});
		let _guard = self.mutex.lock().unwrap();
		self.condvar.notify_one();
	}

	/// Cooperative wait: performs dequeue-and-run steps on the calling thread
	/// until `handle`'s counter reaches zero.
	pub fn drain(&self, handle: &QueueHandle) {
		while handle.pending() > 0 {
			if !self.dequeue_and_run() {
				thread::yield_now();
			}
		}
	}

	/// Marks `handle` cancelled, cooperatively drains it, then clears the flag
	/// so the handle can be reused for further submissions.
	pub fn cancel(&self, handle: &QueueHandle) {
		handle.inner.cancelled.0.store(true, Ordering::Release);
		self.drain(handle);
		handle.inner.cancelled.0.store(false, Ordering::Release);
	}

	/// Performs one dequeue-and-run step, scanning bands high to low.
	/// Returns whether a task was found (and therefore run or discarded).
	pub fn steal(&self) -> bool {
		self.dequeue_and_run()
	}

	fn dequeue_and_run(&self) -> bool {
		for band in &self.bands {
			if let Some(QueuedTask { handle, func }) = band.pop() {
				if handle.cancelled.0.load(Ordering::Acquire) {
					trace!(label = %handle.label, "discarding cancelled task");
				} else {
					trace!(label = %handle.label, "running task");
					if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(func)) {
						error!(label = %handle.label, ?panic, "task panicked");
						let _ = panic;
					}
				}
				handle.task_counter.0.fetch_sub(1, Ordering::AcqRel);
				return true;
			}
		}
		false
	}

	fn worker_loop(&self) {
		let mut last_work = Instant::now();
		while !self.stop.0.load(Ordering::Relaxed) {
			if self.dequeue_and_run() {
				last_work = Instant::now();
				continue;
			}

			let elapsed = last_work.elapsed();
			if elapsed >= IDLE_YIELD_THRESHOLD {
				let guard = self.mutex.lock().unwrap();
				debug!("worker parking, no tasks for {elapsed:?}");
				let _ = self.condvar.wait_timeout(guard, IDLE_SLEEP_TIMEOUT).unwrap();
			} else {
				thread::yield_now();
			}
		}
	}
}

impl Drop for Pool {
	fn drop(&mut self) {
		self.stop.0.store(true, Ordering::Relaxed);
		{
			let _guard = self.mutex.lock().unwrap();
			self.condvar.notify_all();
		}
		let workers = std::mem::take(&mut *self.workers.lock().unwrap());
		for worker in workers {
			let _ = worker.join();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;

	#[test]
	fn submit_runs_on_worker() {
		let pool = Pool::new(2);
		let counter = Arc::new(AtomicUsize::new(0));
		let handle = Pool::new_handle("t", Priority::Normal);
		for _ in 0..100 {
			let counter = counter.clone();
			pool.submit_to(&handle, move || {
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}
		pool.drain(&handle);
		assert_eq!(counter.load(Ordering::SeqCst), 100);
	}

	#[test]
	fn priority_preemption() {
		let pool = Pool::new(1);
		let order = Arc::new(Mutex::new(Vec::new()));
		let low = Pool::new_handle("low", Priority::Low);
		let high = Pool::new_handle("high", Priority::High);

		{
			let order = order.clone();
			pool.submit_to(&low, move || {
				thread::sleep(Duration::from_millis(50));
				order.lock().unwrap().push("low-1");
			});
		}
		// give the worker a moment to pick up the Low task before High arrives
		thread::sleep(Duration::from_millis(5));
		{
			let order = order.clone();
			pool.submit_to(&high, move || {
				order.lock().unwrap().push("high");
			});
		}
		{
			let order = order.clone();
			pool.submit_to(&low, move || {
				order.lock().unwrap().push("low-2");
			});
		}

		pool.drain(&low);
		pool.drain(&high);

		let order = order.lock().unwrap();
		let high_pos = order.iter().position(|e| *e == "high").unwrap();
		let low2_pos = order.iter().position(|e| *e == "low-2").unwrap();
		assert!(high_pos < low2_pos);
	}

	#[test]
	fn cancellation_clears_pending_and_is_reusable() {
		let pool = Pool::new(4);
		let counter = Arc::new(AtomicUsize::new(0));
		let handle = Pool::new_handle("cancel-me", Priority::Normal);
		for _ in 0..1000 {
			let counter = counter.clone();
			pool.submit_to(&handle, move || {
				thread::sleep(Duration::from_millis(10));
				counter.fetch_add(1, Ordering::SeqCst);
			});
		}
		thread::sleep(Duration::from_millis(5));
		pool.cancel(&handle);
		assert_eq!(handle.pending(), 0);
		assert!(counter.load(Ordering::SeqCst) < 1000);

		let ran = Arc::new(AtomicUsize::new(0));
		let ran2 = ran.clone();
		pool.submit_to(&handle, move || {
			ran2.fetch_add(1, Ordering::SeqCst);
		});
		pool.drain(&handle);
		assert_eq!(ran.load(Ordering::SeqCst), 1);
	}

	#[test]
	#[tracing_test::traced_test]
	fn panicking_task_does_not_poison_worker() {
		let pool = Pool::new(1);
		let handle = Pool::new_handle("panicky", Priority::Normal);
		pool.submit_to(&handle, || panic!("boom"));
		pool.drain(&handle);
		assert!(logs_contain("task panicked"));

		let ran = Arc::new(AtomicUsize::new(0));
		let ran2 = ran.clone();
		pool.submit_to(&handle, move || {
			ran2.fetch_add(1, Ordering::SeqCst);
		});
		pool.drain(&handle);
		assert_eq!(ran.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn drop_with_no_pending_tasks_returns() {
		let pool = Pool::new(2);
		drop(pool);
	}

	#[test]
	fn cancel_does_not_affect_other_handles() {
		let pool = Pool::new(2);
		let a = Pool::new_handle("a", Priority::Normal);
		let b = Pool::new_handle("b", Priority::Normal);
		let b_ran = Arc::new(AtomicUsize::new(0));

		for _ in 0..50 {
			pool.submit_to(&a, || {
				thread::sleep(Duration::from_millis(5));
			});
		}
		for _ in 0..50 {
			let b_ran = b_ran.clone();
			pool.submit_to(&b, move || {
				b_ran.fetch_add(1, Ordering::SeqCst);
			});
		}
		pool.cancel(&a);
		pool.drain(&b);
		assert_eq!(b_ran.load(Ordering::SeqCst), 50);
	}
}
