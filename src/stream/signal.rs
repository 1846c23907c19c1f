use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cooperative cancellation token shared by a supervisor and one worker.
///
/// The worker checks it at the top of every cycle and sleeps on it, so a
/// stop request also cuts short a retry or pacing sleep.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        match lock.lock() {
            Ok(mut stopped) => *stopped = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(stopped) => *stopped,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep up to `timeout`. Returns true if a stop was requested.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let Ok(guard) = lock.lock() else {
            return true;
        };
        match cvar.wait_timeout_while(guard, timeout, |stopped| !*stopped) {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_runs_full_timeout_when_not_stopped() {
        let signal = StopSignal::new();
        let started = Instant::now();
        assert!(!signal.sleep(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_wakes_a_sleeping_worker() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let stopped = remote.sleep(Duration::from_secs(10));
            (stopped, started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.stop();
        let (stopped, waited) = handle.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(5));
        assert!(signal.is_stopped());
    }
}
