use std::{
	io::{self, Write as _},
	thread::sleep,
	time::Duration,
};

use concurrency_core::{ConcurrentQueue, Priority};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

pub fn main() {
	let tasks = 16;

	let multi_pb = MultiProgress::new();

	tracing_subscriber::fmt()
		.without_time()
		.with_target(false)
		.with_thread_names(true)
		.with_writer(IndicatifWriter(multi_pb.clone()))
		.with_max_level(Level::TRACE)
		.init();

	let main_pb = multi_pb.add(
		ProgressBar::new(tasks)
			.with_style(
				ProgressStyle::with_template("[{bar:40}] {spinner} {wide_msg}")
					.unwrap()
					.progress_chars("=>-"),
			)
			.with_message("enqueueing tasks..."),
	);
	main_pb.enable_steady_tick(Duration::from_millis(100));

	let q = ConcurrentQueue::with("progress-demo", Priority::Normal);

	for i in 0..tasks {
		let main_pb = main_pb.clone();
		q.enqueue(move || {
			sleep(Duration::from_millis(50 + i * 5));
			main_pb.inc(1);
		});
	}

	q.wait();
	main_pb.finish_with_message("done");
}

#[derive(Debug, Clone)]
struct IndicatifWriter(MultiProgress);

impl io::Write for IndicatifWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.suspend(|| io::stdout().write(buf))
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.0.suspend(|| io::stdout().flush())
	}
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
	type Writer = IndicatifWriter;

	fn make_writer(&'a self) -> Self::Writer {
		Self(self.0.clone())
	}
}
