use std::{
	fmt,
	panic::{self, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Condvar, Mutex,
	},
	thread::{self, JoinHandle},
};

use crossbeam_queue::SegQueue;
use tracing::{debug, error, trace};

use crate::align::Aligned;

type Task = Box<dyn FnOnce() + Send>;

/// A single-shot signal fulfilled exactly once, awaited by the consumer
/// thread. A small hand-rolled analogue of a `promise<void>`/`future<void>`
/// pair.
#[derive(Default)]
struct ReadySignal {
	mutex: Mutex<bool>,
	condvar: Condvar,
}

impl ReadySignal {
	fn fulfill(&self) {
		let mut ready = self.mutex.lock().unwrap();
		if !*ready {
			*ready = true;
			self.condvar.notify_all();
		}
	}

	fn wait(&self) {
		let guard = self.mutex.lock().unwrap();
		let _guard = self.condvar.wait_while(guard, |ready| !*ready).unwrap();
	}
}

struct TicketTask {
	count: AtomicUsize,
	func: Mutex<Option<Task>>,
	ready: ReadySignal,
}

impl TicketTask {
	fn new() -> Self {
		Self {
			count: AtomicUsize::new(1),
			func: Mutex::new(None),
			ready: ReadySignal::default(),
		}
	}
}

/// A reference-counted reservation on a [`TicketQueue`].
///
/// Dropping every clone of a `Ticket` without ever calling
/// [`consume`](Self::consume) fulfills it with a no-op completion, so an
/// abandoned ticket never deadlocks the consumer thread.
pub struct Ticket {
	task: Arc<TicketTask>,
}

impl fmt::Debug for Ticket {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Ticket")
			.field("refs", &Arc::strong_count(&self.task))
			.finish()
	}
}

impl Ticket {
	/// Installs `f` as this ticket's completion closure and fulfills it.
	///
	/// # Panics
	/// Panics if called more than once on clones of the same ticket.
	pub fn consume<F: FnOnce() + Send + 'static>(&self, f: F) {
		let mut slot = self.task.func.lock().unwrap();
		assert!(slot.is_none(), "ticket consumed more than once");
		*slot = Some(Box::new(f));
		drop(slot);
		self.task.ready.fulfill();
	}
}

impl Clone for Ticket {
	fn clone(&self) -> Self {
		self.task.count.fetch_add(1, Ordering::AcqRel);
		Self {
			task: self.task.clone(),
		}
	}
}

impl Drop for Ticket {
	fn drop(&mut self) {
		if self.task.count.fetch_sub(1, Ordering::AcqRel) == 1 {
			// last reference: if nobody ever consumed, complete as a no-op
			// so the consumer thread is never stuck waiting on it.
			if self.task.func.lock().unwrap().is_none() {
				self.task.ready.fulfill();
			}
		}
	}
}

struct Shared {
	queue: SegQueue<Arc<TicketTask>>,
	pending: Aligned<AtomicUsize>,
	stop: Aligned<AtomicBool>,
	consumer_mutex: Mutex<()>,
	consumer_cv: Condvar,
	wait_mutex: Mutex<()>,
	wait_cv: Condvar,
}

/// Sequences the *completion* of concurrently computed results in the order
/// their tickets were acquired, without serializing the (expensive) work
/// that produces each result.
///
/// # Examples
///
/// ```
/// use concurrency_core::{ConcurrentQueue, TicketQueue};
/// use std::sync::{Arc, Mutex};
///
/// let pool_queue = ConcurrentQueue::new();
/// let tickets = TicketQueue::new();
/// let results = Arc::new(Mutex::new(Vec::new()));
///
/// for i in 0..100 {
/// 	let ticket = tickets.acquire();
/// 	let results = results.clone();
/// 	pool_queue.enqueue(move || {
/// 		// arbitrary, possibly out-of-order, work happens here
/// 		ticket.consume(move || results.lock().unwrap().push(i));
/// 	});
/// }
/// pool_queue.wait();
/// tickets.wait();
/// assert_eq!(*results.lock().unwrap(), (0..100).collect::<Vec<_>>());
/// ```
#[derive(Debug)]
pub struct TicketQueue {
	shared: Arc<Shared>,
	consumer: Option<JoinHandle<()>>,
}

impl fmt::Debug for Shared {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TicketQueue")
			.field("pending", &self.pending.0.load(Ordering::Relaxed))
			.finish()
	}
}

impl TicketQueue {
	/// Constructs a queue and spawns its consumer thread.
	#[must_use]
	pub fn new() -> Self {
		let shared = Arc::new(Shared {
			queue: SegQueue::new(),
			pending: Aligned(AtomicUsize::new(0)),
			stop: Aligned(AtomicBool::new(false)),
			consumer_mutex: Mutex::new(()),
			consumer_cv: Condvar::new(),
			wait_mutex: Mutex::new(()),
			wait_cv: Condvar::new(),
		});

		let consumer_shared = shared.clone();
		let consumer = thread::Builder::new()
			.name("ticket-queue-consumer".into())
			.spawn(move || Self::consumer_loop(&consumer_shared))
			.expect("ticket queue consumer thread to be spawned");

		Self {
			shared,
			consumer: Some(consumer),
		}
	}

	fn consumer_loop(shared: &Shared) {
		loop {
			if !Self::dequeue_and_process(shared) {
				if shared.stop.0.load(Ordering::Relaxed) {
					break;
				}
				let guard = shared.consumer_mutex.lock().unwrap();
				trace!("ticket consumer idle");
				let _guard = shared
					.consumer_cv
					.wait_while(guard, |_| shared.queue.is_empty() && !shared.stop.0.load(Ordering::Relaxed))
					.unwrap();
			}
		}
	}

	fn dequeue_and_process(shared: &Shared) -> bool {
		let Some(task) = shared.queue.pop() else {
			return false;
		};

		task.ready.wait();

		let func = task.func.lock().unwrap().take();
		if let Some(func) = func {
			trace!("ticket consumer invoking completion");
			if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(func)) {
				error!(?panic, "ticket completion panicked");
			}
		}

		if shared.pending.0.fetch_sub(1, Ordering::AcqRel) == 1 {
			let _guard = shared.wait_mutex.lock().unwrap();
			shared.wait_cv.notify_all();
		}
		true
	}

	/// Reserves the next completion slot and returns a [`Ticket`] for it.
	#[must_use]
	pub fn acquire(&self) -> Ticket {
		self.shared.pending.0.fetch_add(1, Ordering::AcqRel);
		let task = Arc::new(TicketTask::new());
		self.shared.queue.push(task.clone());
		let _guard = self.shared.consumer_mutex.lock().unwrap();
		self.shared.consumer_cv.notify_one();
		drop(_guard);
		Ticket { task }
	}

	/// Blocks until every acquired ticket has had its completion invoked (or
	/// discarded as abandoned).
	pub fn wait(&self) {
		let guard = self.shared.wait_mutex.lock().unwrap();
		let _guard = self
			.shared
			.wait_cv
			.wait_while(guard, |_| self.shared.pending.0.load(Ordering::Acquire) > 0)
			.unwrap();
	}

	/// Number of tickets acquired but not yet completed.
	pub fn pending(&self) -> usize {
		self.shared.pending.0.load(Ordering::Acquire)
	}
}

impl Default for TicketQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for TicketQueue {
	fn drop(&mut self) {
		self.wait();
		self.shared.stop.0.store(true, Ordering::Relaxed);
		{
			let _guard = self.shared.consumer_mutex.lock().unwrap();
			self.shared.consumer_cv.notify_all();
		}
		if let Some(consumer) = self.consumer.take() {
			debug!("joining ticket queue consumer");
			let _ = consumer.join();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ConcurrentQueue, Pool};
	use std::{
		sync::Mutex as StdMutex,
		thread,
		time::Duration,
	};

	#[test]
	fn completions_run_in_acquisition_order_despite_random_finish_order() {
		let pool = Pool::new(8);
		let q = ConcurrentQueue::with_pool(pool, "ticket-producers", crate::Priority::Normal);
		let tickets = TicketQueue::new();
		let results = Arc::new(StdMutex::new(Vec::new()));

		for i in 0..2000u32 {
			let ticket = tickets.acquire();
			let results = results.clone();
			q.enqueue(move || {
				// simulate out-of-order producer completion
				let delay = (i % 7) as u64;
				thread::sleep(Duration::from_micros(delay));
				ticket.consume(move || {
					results.lock().unwrap().push(i);
				});
			});
		}
		q.wait();
		tickets.wait();

		let results = results.lock().unwrap();
		assert_eq!(*results, (0..2000u32).collect::<Vec<_>>());
	}

	#[test]
	fn abandoned_ticket_does_not_deadlock_queue() {
		let tickets = TicketQueue::new();
		{
			let _ticket = tickets.acquire();
			// dropped without consume
		}
		let consumed = Arc::new(std::sync::atomic::AtomicBool::new(false));
		let ticket2 = tickets.acquire();
		let consumed2 = consumed.clone();
		ticket2.consume(move || consumed2.store(true, Ordering::SeqCst));
		tickets.wait();
		assert!(consumed.load(Ordering::SeqCst));
	}

	#[test]
	fn wait_on_empty_queue_returns_promptly() {
		let tickets = TicketQueue::new();
		tickets.wait();
	}

	#[test]
	#[should_panic(expected = "consumed more than once")]
	fn consuming_twice_panics() {
		let tickets = TicketQueue::new();
		let ticket = tickets.acquire();
		ticket.consume(|| {});
		ticket.consume(|| {});
	}
}
