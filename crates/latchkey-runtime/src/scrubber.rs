//! Best-effort process memory wipe.
//!
//! There is no portable way to scrub freed heap pages. [`HeapScrubber`]
//! allocates a scratch region about the size of the freed key material and
//! its buffers, and zeroizes it. The allocator tends to hand back recently
//! freed blocks, so this overwrites some residue. It never fails.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use latchkey_core::MemoryWiper;
use tracing::{debug, trace};
use zeroize::Zeroize;

/// Default scratch region size.
pub const DEFAULT_REGION: usize = 64 * 1024;

/// Wipes by allocating and zeroizing a scratch region.
#[derive(Debug, Clone)]
pub struct HeapScrubber {
    region: usize,
    completed: Arc<AtomicU64>,
}

impl HeapScrubber {
    /// Create a scrubber over `region` bytes.
    pub fn new(region: usize) -> Self {
        Self { region, completed: Arc::new(AtomicU64::new(0)) }
    }

    /// Wipes that have finished.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn scrub(region: usize, completed: &AtomicU64) {
        let mut scratch = vec![0xA5u8; region];
        scratch.zeroize();
        completed.fetch_add(1, Ordering::Release);
        trace!(region, "scratch region zeroized");
    }
}

impl Default for HeapScrubber {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl MemoryWiper for HeapScrubber {
    fn request_wipe(&self, blocking: bool) {
        debug!(blocking, "memory wipe requested");

        if !blocking && let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let region = self.region;
            let completed = Arc::clone(&self.completed);
            // Detached. Nothing waits on a non-blocking wipe.
            drop(runtime.spawn_blocking(move || Self::scrub(region, &completed)));
            return;
        }

        Self::scrub(self.region, &self.completed);
    }
}
