use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const RING_BUFFER_SIZE: usize = 64 * 1024;

/// Bounded sink for a child's combined stdout/stderr.
///
/// Older bytes are dropped once the ring is full; `snapshot` copies whatever
/// is currently retained. Writers are the detached pipe tasks — nothing in
/// the lifecycle path ever waits on them.
#[derive(Clone, Default)]
pub struct OutputCapture {
	ring: Arc<Mutex<VecDeque<u8>>>,
}

impl OutputCapture {
	pub fn new() -> Self {
		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
		}
	}

	pub async fn write(&self, data: &[u8]) {
		let mut ring = self.ring.lock().await;
		for &byte in data {
			if ring.len() >= RING_BUFFER_SIZE {
				ring.pop_front();
			}
			ring.push_back(byte);
		}
	}

	pub async fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().await;
		ring.iter().copied().collect()
	}

	pub async fn clear(&self) {
		self.ring.lock().await.clear();
	}
}
