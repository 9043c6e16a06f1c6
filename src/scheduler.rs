// src/scheduler.rs - Clocks and one-shot cancellable timers
#[cfg(feature = "tokio-scheduler")]
use crate::error::{BacError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Source of wall-clock time for timestamps and validity windows
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cancellation flag shared between a scheduled task and its owner
///
/// Cancelling is cooperative: a task whose handle was cancelled before it
/// fires never runs. A task already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// One-shot delayed callback service
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

// ============================================================================
// TOKIO SCHEDULER
// ============================================================================

/// Scheduler backed by a tokio runtime
///
/// Each timer is a spawned task that sleeps and then checks its cancel flag.
#[cfg(feature = "tokio-scheduler")]
#[derive(Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio-scheduler")]
impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| BacError::Config(format!("no tokio runtime available: {}", e)))
    }
}

#[cfg(feature = "tokio-scheduler")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let flag = handle.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.is_cancelled() {
                task();
            }
        });
        handle
    }
}

#[cfg(feature = "tokio-scheduler")]
impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").finish()
    }
}

// ============================================================================
// VIRTUAL CLOCK
// ============================================================================

struct VirtualState {
    now: DateTime<Utc>,
    seq: u64,
    queue: BTreeMap<(DateTime<Utc>, u64), (TimerHandle, Task)>,
}

/// Manually advanced clock that doubles as a scheduler
///
/// Timers fire in due order during [`VirtualClock::advance`], with the clock
/// set to each timer's due time while it runs. Tasks may schedule further
/// timers; those fire within the same advance if they fall due.
///
/// # Examples
///
/// ```rust
/// use bacevent::{Scheduler, VirtualClock};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = VirtualClock::default();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// clock.schedule(Duration::from_secs(5), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// clock.advance(Duration::from_secs(4));
/// assert!(!fired.load(Ordering::SeqCst));
/// clock.advance(Duration::from_secs(1));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                now: start,
                seq: 0,
                queue: BTreeMap::new(),
            })),
        }
    }

    /// Move time forward, running every timer that falls due
    pub fn advance(&self, by: Duration) {
        let target = {
            let state = self.state.lock();
            state.now + to_chrono(by)
        };

        loop {
            let next = {
                let mut state = self.state.lock();
                let due = state.queue.keys().next().copied().filter(|(at, _)| *at <= target);
                match due {
                    Some(key) => {
                        state.now = key.0;
                        state.queue.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            match next {
                Some((handle, task)) => {
                    if !handle.is_cancelled() {
                        trace!("Virtual timer firing");
                        task();
                    }
                }
                None => break,
            }
        }
    }

    /// Number of timers scheduled and not cancelled
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .values()
            .filter(|(handle, _)| !handle.is_cancelled())
            .count()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        let due = state.now + to_chrono(delay);
        state.seq += 1;
        let key = (due, state.seq);
        state.queue.insert(key, (handle.clone(), task));
        handle
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("queued", &state.queue.len())
            .finish()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
