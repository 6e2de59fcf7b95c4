use std::{
	collections::VecDeque,
	fmt,
	panic::{self, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Condvar, Mutex,
	},
	thread::{self, JoinHandle},
};

use tracing::{debug, error, trace};

use crate::align::Aligned;

type Task = Box<dyn FnOnce() + Send>;

struct Shared {
	deque: Mutex<VecDeque<Task>>,
	worker_cv: Condvar,
	wait_cv: Condvar,
	wait_mutex: Mutex<()>,
	task_counter: Aligned<AtomicUsize>,
	stop: Aligned<AtomicBool>,
	label: String,
}

/// A single dedicated worker thread that executes submitted closures in
/// strict first-in-first-out order, independent of any [`crate::Pool`].
///
/// # Examples
///
/// ```
/// use concurrency_core::SerialQueue;
/// use std::sync::{Arc, Mutex};
///
/// let q = SerialQueue::new();
/// let log = Arc::new(Mutex::new(Vec::new()));
/// for i in 0..8 {
/// 	let log = log.clone();
/// 	q.enqueue(move || log.lock().unwrap().push(i));
/// }
/// q.wait();
/// assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
/// ```
#[derive(Debug)]
pub struct SerialQueue {
	shared: Arc<Shared>,
	worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for Shared {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SerialQueue")
			.field("label", &self.label)
			.field("pending", &self.task_counter.0.load(Ordering::Relaxed))
			.finish()
	}
}

impl SerialQueue {
	/// Constructs a queue with a default label and spawns its worker thread.
	#[must_use]
	pub fn new() -> Self {
		Self::with("serial-queue")
	}

	/// Constructs a labelled queue and spawns its worker thread.
	#[must_use]
	pub fn with(label: impl Into<String>) -> Self {
		let shared = Arc::new(Shared {
			deque: Mutex::new(VecDeque::new()),
			worker_cv: Condvar::new(),
			wait_cv: Condvar::new(),
			wait_mutex: Mutex::new(()),
			task_counter: Aligned(AtomicUsize::new(0)),
			stop: Aligned(AtomicBool::new(false)),
			label: label.into(),
		});

		let worker_shared = shared.clone();
		let worker = thread::Builder::new()
			.name(format!("serial-{}", shared.label))
			.spawn(move || Self::worker_loop(&worker_shared))
			.expect("serial queue worker to be spawned");

		Self {
			shared,
			worker: Some(worker),
		}
	}

	fn worker_loop(shared: &Shared) {
		loop {
			let mut guard = shared.deque.lock().unwrap();
			let task = loop {
				if let Some(task) = guard.pop_front() {
					break Some(task);
				}
				if shared.stop.0.load(Ordering::Relaxed) {
					break None;
				}
				trace!(label = %shared.label, "serial worker idle");
				drop(shared.wait_mutex.lock().unwrap());
				shared.wait_cv.notify_all();
				guard = shared.worker_cv.wait(guard).unwrap();
			};
			drop(guard);

			let Some(task) = task else {
				debug!(label = %shared.label, "serial worker stopping");
				break;
			};

			trace!(label = %shared.label, "serial worker running task");
			if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
				error!(label = %shared.label, ?panic, "serial task panicked");
			}

			if shared.task_counter.0.fetch_sub(1, Ordering::AcqRel) == 1 {
				let _guard = shared.wait_mutex.lock().unwrap();
				shared.wait_cv.notify_all();
			}
		}
	}

	/// Appends `f` to the tail of the deque and wakes the worker.
	pub fn enqueue<F: FnOnce() + Send + 'static>(&self, f: F) {
		let mut guard = self.shared.deque.lock().unwrap();
		guard.push_back(Box::new(f));
		self.shared.task_counter.0.fetch_add(1, Ordering::AcqRel);
		self.shared.worker_cv.notify_one();
	}

	/// Discards every closure currently queued (but not one already
	/// executing).
	pub fn cancel(&self) {
		let mut guard = self.shared.deque.lock().unwrap();
		let discarded = guard.len();
		guard.clear();
		drop(guard);
		if discarded > 0 {
			let remaining = self
				.shared
				.task_counter
				.0
				.fetch_sub(discarded, Ordering::AcqRel)
				- discarded;
			if remaining == 0 {
				let _guard = self.shared.wait_mutex.lock().unwrap();
				self.shared.wait_cv.notify_all();
			}
		}
	}

	/// Blocks until every previously submitted closure has completed (or
	/// been cancelled).
	pub fn wait(&self) {
		let guard = self.shared.wait_mutex.lock().unwrap();
		let _guard = self
			.shared
			.wait_cv
			.wait_while(guard, |_| self.shared.task_counter.0.load(Ordering::Acquire) > 0)
			.unwrap();
	}

	/// Current number of pending or executing closures.
	pub fn pending(&self) -> usize {
		self.shared.task_counter.0.load(Ordering::Acquire)
	}
}

impl Default for SerialQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for SerialQueue {
	fn drop(&mut self) {
		self.wait();
		self.shared.stop.0.store(true, Ordering::Relaxed);
		self.shared.worker_cv.notify_all();
		if let Some(worker) = self.worker.take() {
			let _ = worker.join();
		}
	}
}
