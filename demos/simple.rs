use std::{thread::sleep, time::Duration};

use concurrency_core::{ConcurrentQueue, Priority};
use tracing::Level;

pub fn main() {
	tracing_subscriber::fmt()
		.with_max_level(Level::TRACE)
		.init();

	let q = ConcurrentQueue::with("demo", Priority::Normal);

	for i in 0..16 {
		q.enqueue(move || {
			println!("task {i} running");
			sleep(Duration::from_millis(100));
		});
	}

	// wait() is cooperative: the calling thread helps the pool drain the
	// queue instead of blocking idle.
	q.wait();
	println!("main thread finished");
}
