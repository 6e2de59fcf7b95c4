use std::{
	sync::{Arc, Mutex},
	thread::sleep,
	time::Duration,
};

use concurrency_core::{ConcurrentQueue, Priority, TicketQueue};
use tracing::Level;

/// Demonstrates that completion callbacks run in ticket-acquisition order
/// even though the producer work they depend on finishes out of order.
pub fn main() {
	tracing_subscriber::fmt()
		.with_max_level(Level::DEBUG)
		.init();

	let producers = ConcurrentQueue::with("ticket-producers", Priority::Normal);
	let tickets = TicketQueue::new();
	let destination = Arc::new(Mutex::new(Vec::new()));

	for i in 0..64u32 {
		let ticket = tickets.acquire();
		let destination = destination.clone();
		producers.enqueue(move || {
			// producers race: later tickets may finish their work first.
			sleep(Duration::from_micros(u64::from((i * 37) % 500)));
			ticket.consume(move || destination.lock().unwrap().push(i));
		});
	}

	producers.wait();
	tickets.wait();

	let destination = destination.lock().unwrap();
	assert_eq!(*destination, (0..64u32).collect::<Vec<_>>());
	println!("completions landed in acquisition order: {destination:?}");
}
