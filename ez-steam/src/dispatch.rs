//! Outstanding-call counter and the dispatch thread that pumps the platform
//! while the counter is non-zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::Result;
use crate::platform::Platform;

const THREAD_NAME: &str = "ez-steam-dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Waiting for the first outstanding call or a shutdown request.
    Idle,
    /// Pumping the platform until no calls are outstanding.
    Pumping,
    Terminated,
}

#[derive(Debug)]
struct DispatchState {
    should_shutdown: bool,
    mode: DispatchMode,
    /// Bumped on every 0→1 transition of the count.
    wakeups: u64,
}

/// Count of asynchronous calls started but not yet resolved.
///
/// Shared by every bridge and the dispatch thread. The dispatch lock and
/// condition variable live here so that the 0→1 transition can wake the
/// thread without a lost wakeup.
#[derive(Debug)]
pub struct OutstandingCalls {
    count: AtomicUsize,
    state: Mutex<DispatchState>,
    wake: Condvar,
}

impl Default for OutstandingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl OutstandingCalls {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            state: Mutex::new(DispatchState {
                should_shutdown: false,
                mode: DispatchMode::Idle,
                wakeups: 0,
            }),
            wake: Condvar::new(),
        }
    }

    pub fn increment(&self) {
        let previous = self.count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            // First outstanding call. Notify under the lock: the dispatch
            // thread checks the count while holding it.
            let mut state = self.state.lock();
            state.wakeups += 1;
            self.wake.notify_all();
        }
    }

    pub fn decrement(&self) {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "outstanding call count went negative");
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> DispatchMode {
        self.state.lock().mode
    }

    fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.should_shutdown = true;
        self.wake.notify_all();
    }
}

/// The single background worker that owns the platform pump.
pub struct DispatchThread {
    calls: Arc<OutstandingCalls>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    /// Spawn the worker. It starts out idle.
    pub fn spawn<P: Platform>(
        platform: Arc<P>,
        calls: Arc<OutstandingCalls>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let worker_calls = Arc::clone(&calls);
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&*platform, &worker_calls, poll_interval))?;
        Ok(Self {
            calls,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Ask the worker to stop and join it. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.calls.request_shutdown();
        if handle.join().is_err() {
            tracing::error!("dispatch thread panicked");
        }
        tracing::debug!("dispatch thread joined");
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<P: Platform>(platform: &P, calls: &OutstandingCalls, poll_interval: Duration) {
    let mut state = calls.state.lock();
    loop {
        while !state.should_shutdown && calls.get() == 0 {
            state.mode = DispatchMode::Idle;
            tracing::trace!("dispatch idle");
            calls.wake.wait(&mut state);
        }
        if state.should_shutdown {
            break;
        }

        state.mode = DispatchMode::Pumping;
        tracing::debug!(outstanding = calls.get(), "dispatch pumping");
        pump_until_drained(platform, calls, &mut state, poll_interval);
        if state.should_shutdown {
            break;
        }
    }
    state.mode = DispatchMode::Terminated;
    tracing::debug!("dispatch terminated");
}

fn pump_until_drained<P: Platform>(
    platform: &P,
    calls: &OutstandingCalls,
    state: &mut MutexGuard<'_, DispatchState>,
    poll_interval: Duration,
) {
    loop {
        let seen = state.wakeups;
        // Completions may start new calls, which take the dispatch lock.
        MutexGuard::unlocked(state, || platform.run_callbacks());
        if state.should_shutdown || calls.get() == 0 {
            return;
        }
        if state.wakeups != seen {
            // The count drained and refilled during the pump; that wakeup
            // had no waiter.
            continue;
        }
        calls.wake.wait_for(state, poll_interval);
        if state.should_shutdown {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_counter_round_trip() {
        let calls = OutstandingCalls::new();
        calls.increment();
        calls.increment();
        assert_eq!(calls.get(), 2);
        calls.decrement();
        calls.decrement();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_idle_thread_does_not_pump() {
        let platform = Arc::new(SimPlatform::new());
        let calls = Arc::new(OutstandingCalls::new());
        let mut thread = DispatchThread::spawn(Arc::clone(&platform), Arc::clone(&calls), POLL).unwrap();

        std::thread::sleep(POLL * 10);
        assert_eq!(platform.pump_count(), 0);
        assert_eq!(calls.mode(), DispatchMode::Idle);

        thread.shutdown();
        assert_eq!(calls.mode(), DispatchMode::Terminated);
    }

    #[test]
    fn test_increment_wakes_and_drain_idles() {
        let platform = Arc::new(SimPlatform::new());
        let calls = Arc::new(OutstandingCalls::new());
        let mut thread = DispatchThread::spawn(Arc::clone(&platform), Arc::clone(&calls), POLL).unwrap();

        calls.increment();
        assert!(wait_until(|| platform.pump_count() >= 2));
        assert_eq!(calls.mode(), DispatchMode::Pumping);

        calls.decrement();
        assert!(wait_until(|| calls.mode() == DispatchMode::Idle));
        let settled = platform.pump_count();
        std::thread::sleep(POLL * 10);
        assert_eq!(platform.pump_count(), settled);

        thread.shutdown();
    }

    #[test]
    fn test_shutdown_interrupts_pumping() {
        let platform = Arc::new(SimPlatform::new());
        let calls = Arc::new(OutstandingCalls::new());
        let mut thread = DispatchThread::spawn(
            Arc::clone(&platform),
            Arc::clone(&calls),
            Duration::from_secs(60),
        )
        .unwrap();

        calls.increment();
        assert!(wait_until(|| platform.pump_count() >= 1));

        let started = Instant::now();
        thread.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!thread.is_running());
        // Second shutdown is a no-op
        thread.shutdown();
    }
}
