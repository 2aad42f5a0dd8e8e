// VMBENCH CLOCK + STOP SIGNAL
// THE SAMPLER PACES ITSELF ON AN INJECTED CLOCK INSTEAD OF THE BLOCKING
// LATENCY OF A COUNTER READ. TESTS SUBSTITUTE VIRTUAL TIME.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// LONGEST UNINTERRUPTED SLEEP WHILE A STOP SIGNAL IS PENDING
pub const STOP_POLL: Duration = Duration::from_millis(50);

pub trait Clock: Send + Sync {
    // MONOTONIC TIME SINCE AN ARBITRARY ORIGIN
    fn now(&self) -> Duration;
    fn sleep(&self, dur: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// Virtual time that only moves when somebody sleeps on it.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, dur: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += dur;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
        std::thread::yield_now();
    }
}

/// Cooperative cancellation flag shared between the orchestrator and the sampler.
///
/// Raising is one-way. Release/acquire ordering pairs the raise with the
/// sampler's observation of it.
#[derive(Clone, Default, Debug)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// WAIT UP TO `dur` ON `clock`, WAKING EVERY STOP_POLL TO CHECK `stop`.
// RETURNS TRUE IF THE STOP SIGNAL WAS SEEN BEFORE THE DEADLINE.
pub fn wait_or_stop(clock: &dyn Clock, stop: &StopSignal, dur: Duration) -> bool {
    let deadline = clock.now() + dur;
    loop {
        if stop.is_raised() {
            return true;
        }
        let now = clock.now();
        if now >= deadline {
            return false;
        }
        clock.sleep((deadline - now).min(STOP_POLL));
    }
}
