//! Deterministic time source.
//!
//! Everything in the pipeline that needs "now" (audit timestamps, risk-store
//! window resets, `hold_until_epoch` computation) goes through a `Clock`
//! rather than calling `SystemTime::now()` directly, so tests can inject a
//! [`VirtualClock`] and assert exact values instead of tolerating skew.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction for deterministic time in pipeline control paths.
/// Returns milliseconds since UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;

    /// Current time in whole seconds since the UNIX epoch.
    fn now_epoch_sec(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// System (production) clock. Wraps `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Virtual (deterministic/replay) clock with manual control.
#[derive(Debug)]
pub struct VirtualClock {
    inner: AtomicU64,
}

impl VirtualClock {
    /// Create a new virtual clock seeded at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self { inner: AtomicU64::new(start_ms) }
    }

    /// Advance the virtual clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.inner.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the virtual clock to an absolute ms value.
    pub fn set_ms(&self, value: u64) {
        self.inner.store(value, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.inner.load(Ordering::SeqCst)
    }
}

static PROCESS_CLOCK: OnceLock<RwLock<Arc<dyn Clock>>> = OnceLock::new();

fn registry() -> &'static RwLock<Arc<dyn Clock>> {
    PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)))
}

/// Get the current process-wide `Clock` (Arc clone). Defaults to [`SystemClock`].
pub fn process_clock() -> Arc<dyn Clock> {
    registry().read().expect("clock lock poisoned").clone()
}

/// Set/swap the process-wide `Clock`. Used by tests and deterministic replay.
pub fn set_process_clock(clock: Arc<dyn Clock>) {
    *registry().write().expect("clock lock poisoned") = clock;
}
