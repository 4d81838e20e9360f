use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of [`StopSignal::pause`].
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Cooperative stop request shared between an interrupt handler and a run loop.
///
/// Loops check it between records, so a stop never splits a delivery.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `wait`, waking early once a stop is requested.
    ///
    /// Returns `true` if the stop was seen.
    pub fn pause(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_triggered());
        handle.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn pause_wakes_on_stop() {
        let signal = StopSignal::new();
        assert!(!signal.pause(Duration::from_millis(10)));

        let handle = signal.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            handle.trigger();
        });
        let started = Instant::now();
        assert!(signal.pause(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().expect("stopper");
    }
}
