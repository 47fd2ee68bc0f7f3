//! Blocking calls over the platform's start/complete pairs.
//!
//! A [`CallBridge`] wraps one operation kind: a start function that returns a
//! correlation handle and a translate function that turns the raw completion
//! record into a payload. `call` starts the operation, registers the
//! completion, and parks the caller until the dispatch thread delivers it.
//! Calls through one bridge are serialized; different bridges run
//! independently.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::dispatch::OutstandingCalls;
use crate::error::{Error, FailureReason, Result};
use crate::platform::{ApiCall, CompletionFn, CompletionRecord, Platform, RawCompletion};

/// Outcome of one in-flight call, filled in on the dispatch thread.
#[derive(Debug, Default)]
pub struct CompletionState<T> {
    pub succeeded: bool,
    pub data: T,
    failure: Option<FailureReason>,
}

impl<T> CompletionState<T> {
    /// Mark the call failed. The first reason recorded wins.
    pub fn fail(&mut self, reason: FailureReason) {
        self.succeeded = false;
        self.failure.get_or_insert(reason);
    }

    fn failure_reason(&self) -> FailureReason {
        self.failure.clone().unwrap_or(FailureReason::Rejected)
    }
}

type StartFn<P, A> = Box<dyn Fn(&P, A) -> Result<ApiCall> + Send + Sync>;
type TranslateFn<P, R, T> =
    Arc<dyn Fn(&P, &R, &mut CompletionState<T>) -> Result<()> + Send + Sync>;

struct SlotState<T> {
    completion: CompletionState<T>,
    resolved: bool,
}

/// One-shot handoff between the dispatch thread and the parked caller.
struct CallSlot<T> {
    state: Mutex<SlotState<T>>,
    resolved: Condvar,
}

impl<T: Default> CallSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                completion: CompletionState::default(),
                resolved: false,
            }),
            resolved: Condvar::new(),
        }
    }

    fn wait(&self) -> CompletionState<T> {
        let mut state = self.state.lock();
        while !state.resolved {
            self.resolved.wait(&mut state);
        }
        std::mem::take(&mut state.completion)
    }
}

impl<T> CallSlot<T> {
    /// Fail a call that has not completed yet. Returns false if it already had.
    fn abort(&self, calls: &OutstandingCalls) -> bool {
        let state = self.state.lock();
        if state.resolved {
            return false;
        }
        let mut resolve = Resolve {
            state,
            cond: &self.resolved,
            calls,
        };
        resolve.state.completion.fail(FailureReason::TeardownAborted);
        true
    }
}

/// Resolves a slot when dropped: marks it resolved, settles the outstanding
/// count and wakes the caller, on every exit path.
struct Resolve<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
    cond: &'a Condvar,
    calls: &'a OutstandingCalls,
}

impl<T> Drop for Resolve<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state
                .completion
                .fail(FailureReason::Translation("completion handler panicked".to_string()));
        }
        self.state.resolved = true;
        self.calls.decrement();
        self.cond.notify_all();
    }
}

struct InFlight<T> {
    closed: bool,
    slot: Option<Arc<CallSlot<T>>>,
}

/// Serialized, blocking wrapper around one asynchronous operation kind.
///
/// `R` is the raw completion record, `T` the payload handed back to callers
/// and `A` the operation's arguments.
pub struct CallBridge<P, R, T, A> {
    name: &'static str,
    platform: Arc<P>,
    calls: Arc<OutstandingCalls>,
    start: StartFn<P, A>,
    translate: TranslateFn<P, R, T>,
    call_lock: Mutex<()>,
    in_flight: Mutex<InFlight<T>>,
}

impl<P, R, T, A> CallBridge<P, R, T, A>
where
    P: Platform,
    R: CompletionRecord,
    T: Default + Send + 'static,
{
    pub fn new(
        name: &'static str,
        platform: Arc<P>,
        calls: Arc<OutstandingCalls>,
        start: impl Fn(&P, A) -> Result<ApiCall> + Send + Sync + 'static,
        translate: impl Fn(&P, &R, &mut CompletionState<T>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            platform,
            calls,
            start: Box::new(start),
            translate: Arc::new(translate),
            call_lock: Mutex::new(()),
            in_flight: Mutex::new(InFlight {
                closed: false,
                slot: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.in_flight.lock().closed
    }

    /// Start the operation and block until its completion is delivered or the
    /// bridge is torn down.
    pub fn call(&self, args: A) -> Result<T> {
        let _serial = self.call_lock.lock();
        if self.is_closed() {
            return Err(Error::call_failed(self.name, FailureReason::TeardownAborted));
        }

        let call = (self.start)(&self.platform, args)?;
        if !call.is_valid() {
            tracing::warn!(call = self.name, "platform refused to start call");
            return Err(Error::call_failed(self.name, FailureReason::NotStarted));
        }

        let slot = Arc::new(CallSlot::new());
        // Hold the slot across registration and the increment: a completion
        // delivered by a concurrent pump, or a teardown, waits on this lock
        // and so always settles after the increment.
        let pending = {
            let mut in_flight = self.in_flight.lock();
            if in_flight.closed {
                return Err(Error::call_failed(self.name, FailureReason::TeardownAborted));
            }
            in_flight.slot = Some(Arc::clone(&slot));
            slot.state.lock()
        };

        let on_complete = {
            let name = self.name;
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&self.calls);
            let translate = Arc::clone(&self.translate);
            let on_complete: CompletionFn<P> =
                Box::new(move |platform: &P, raw: RawCompletion, io_failed: bool| {
                    complete(name, platform, &slot, &calls, &*translate, raw, io_failed);
                });
            on_complete
        };
        self.platform.register_call_result(call, on_complete);
        // Registered first, so the pump this wakes can already deliver it.
        self.calls.increment();
        drop(pending);
        tracing::debug!(call = self.name, handle = call.0, "waiting for completion");

        let completion = slot.wait();
        self.in_flight.lock().slot = None;

        if completion.succeeded {
            Ok(completion.data)
        } else {
            let reason = completion.failure_reason();
            tracing::debug!(call = self.name, %reason, "call failed");
            Err(Error::call_failed(self.name, reason))
        }
    }
}

impl<P, R, T, A> CallBridge<P, R, T, A> {
    /// Refuse further calls and fail the one in flight, if any.
    pub fn teardown(&self) {
        let slot = {
            let mut in_flight = self.in_flight.lock();
            in_flight.closed = true;
            in_flight.slot.take()
        };
        if let Some(slot) = slot {
            if slot.abort(&self.calls) {
                tracing::warn!(call = self.name, "in-flight call aborted by teardown");
            }
        }
    }
}

impl<P, R, T, A> Drop for CallBridge<P, R, T, A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn complete<P, R, T>(
    name: &'static str,
    platform: &P,
    slot: &CallSlot<T>,
    calls: &OutstandingCalls,
    translate: &(dyn Fn(&P, &R, &mut CompletionState<T>) -> Result<()> + Send + Sync),
    raw: RawCompletion,
    io_failed: bool,
) where
    R: CompletionRecord,
{
    let state = slot.state.lock();
    if state.resolved {
        tracing::debug!(call = name, "completion arrived after teardown, ignored");
        return;
    }
    let mut resolve = Resolve {
        state,
        cond: &slot.resolved,
        calls,
    };
    let completion = &mut resolve.state.completion;

    if io_failed {
        tracing::warn!(call = name, "platform reported I/O failure");
        completion.fail(FailureReason::IoFailure);
        return;
    }

    let Some(record) = R::from_completion(raw) else {
        completion.fail(FailureReason::Translation(format!(
            "unexpected completion record, wanted {}",
            R::KIND
        )));
        return;
    };

    completion.succeeded = true;
    match catch_unwind(AssertUnwindSafe(|| translate(platform, &record, &mut *completion))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(call = name, error = %e, "translating completion failed");
            completion.fail(FailureReason::Translation(e.to_string()));
        }
        Err(_) => {
            tracing::error!(call = name, "translating completion panicked");
            completion.fail(FailureReason::Translation("translate panicked".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchThread;
    use crate::platform::{LeaderboardFindResult, LeaderboardHandle, UserStats};
    use crate::sim::SimPlatform;
    use std::time::{Duration, Instant};

    type FindBridge = CallBridge<SimPlatform, LeaderboardFindResult, LeaderboardHandle, String>;

    struct Harness {
        platform: Arc<SimPlatform>,
        calls: Arc<OutstandingCalls>,
        _thread: DispatchThread,
    }

    fn harness() -> Harness {
        let platform = Arc::new(SimPlatform::new());
        assert!(platform.init());
        let calls = Arc::new(OutstandingCalls::new());
        let thread = DispatchThread::spawn(
            Arc::clone(&platform),
            Arc::clone(&calls),
            Duration::from_millis(2),
        )
        .unwrap();
        Harness {
            platform,
            calls,
            _thread: thread,
        }
    }

    fn find_bridge(h: &Harness) -> FindBridge {
        CallBridge::new(
            "find_leaderboard",
            Arc::clone(&h.platform),
            Arc::clone(&h.calls),
            |p: &SimPlatform, name: String| {
                let stats = p.user_stats().ok_or(Error::PlatformUnavailable("user_stats"))?;
                Ok(stats.find_leaderboard(&name))
            },
            |_p: &SimPlatform, r: &LeaderboardFindResult, state: &mut CompletionState<LeaderboardHandle>| {
                if r.found {
                    state.data = r.handle;
                } else {
                    state.fail(FailureReason::Rejected);
                }
                Ok(())
            },
        )
    }

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
    fn test_call_returns_payload() {
        let h = harness();
        let bridge = find_bridge(&h);
        let handle = bridge.call("Best Times".to_string()).unwrap();
        assert_ne!(handle, LeaderboardHandle(0));
        assert_eq!(h.calls.get(), 0);
    }

    #[test]
    fn test_translate_can_flip_to_failed() {
        let h = harness();
        let bridge = find_bridge(&h);
        let err = bridge.call("No Such Board".to_string()).unwrap_err();
        assert!(matches!(
            err,
            Error::CallFailed {
                reason: FailureReason::Rejected,
                ..
            }
        ));
        assert_eq!(h.calls.get(), 0);
    }

    #[test]
    fn test_io_failure() {
        let h = harness();
        let bridge = find_bridge(&h);
        h.platform.fail_next_call();
        let err = bridge.call("Best Times".to_string()).unwrap_err();
        assert!(matches!(
            err,
            Error::CallFailed {
                reason: FailureReason::IoFailure,
                ..
            }
        ));
        assert_eq!(h.calls.get(), 0);

        // The bridge stays usable
        assert!(bridge.call("Best Times".to_string()).is_ok());
    }

    #[test]
    fn test_refused_start_leaves_counter_alone() {
        let h = harness();
        let bridge = find_bridge(&h);
        h.platform.refuse_next_call();
        let err = bridge.call("Best Times".to_string()).unwrap_err();
        assert!(matches!(
            err,
            Error::CallFailed {
                reason: FailureReason::NotStarted,
                ..
            }
        ));
        assert_eq!(h.calls.get(), 0);
        assert_eq!(h.platform.pump_count(), 0);
    }

    #[test]
    fn test_translate_error_and_panic_fail_the_call() {
        let h = harness();
        let failing: FindBridge = CallBridge::new(
            "find_leaderboard",
            Arc::clone(&h.platform),
            Arc::clone(&h.calls),
            |p: &SimPlatform, name: String| Ok(p.user_stats().unwrap().find_leaderboard(&name)),
            |_p: &SimPlatform, _r: &LeaderboardFindResult, _s: &mut CompletionState<LeaderboardHandle>| {
                Err(Error::Accessor { call: "sub_query" })
            },
        );
        let err = failing.call("Best Times".to_string()).unwrap_err();
        assert!(matches!(
            err,
            Error::CallFailed {
                reason: FailureReason::Translation(_),
                ..
            }
        ));

        let panicking: FindBridge = CallBridge::new(
            "find_leaderboard",
            Arc::clone(&h.platform),
            Arc::clone(&h.calls),
            |p: &SimPlatform, name: String| Ok(p.user_stats().unwrap().find_leaderboard(&name)),
            |_p: &SimPlatform, _r: &LeaderboardFindResult, _s: &mut CompletionState<LeaderboardHandle>| {
                panic!("boom")
            },
        );
        assert!(panicking.call("Best Times".to_string()).is_err());
        assert_eq!(h.calls.get(), 0);

        // The dispatch thread survived
        assert!(find_bridge(&h).call("Best Times".to_string()).is_ok());
    }

    #[test]
    fn test_same_bridge_calls_are_serialized() {
        let h = harness();
        let bridge = Arc::new(find_bridge(&h));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || bridge.call("Best Times".to_string()))
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }

        assert_eq!(h.platform.peak_pending(), 1);
        assert_eq!(h.calls.get(), 0);
    }

    #[test]
    fn test_teardown_fails_in_flight_call() {
        let h = harness();
        let bridge = Arc::new(find_bridge(&h));
        h.platform.hold_completions(true);

        let caller = {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || bridge.call("Best Times".to_string()))
        };
        assert!(wait_until(|| h.calls.get() == 1));

        bridge.teardown();
        let err = caller.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::CallFailed {
                reason: FailureReason::TeardownAborted,
                ..
            }
        ));
        assert_eq!(h.calls.get(), 0);

        // A late completion must not decrement again
        h.platform.hold_completions(false);
        h.platform.run_callbacks();
        assert_eq!(h.calls.get(), 0);

        assert!(bridge.call("Best Times".to_string()).is_err());
    }
}
