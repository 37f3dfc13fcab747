//! An auto-reset event: `post` releases exactly one `wait`.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        AutoResetEvent::default()
    }

    pub fn post(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Waits until posted or the timeout elapses; returns whether the
    /// event was posted.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*signaled {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .cond
                .wait_timeout(signaled, deadline - now)
                .unwrap();
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
        *signaled = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_releases_one_wait() {
        let event = Arc::new(AutoResetEvent::new());
        let poster = event.clone();

        let handle = thread::spawn(move || {
            poster.post();
        });

        assert!(event.wait_timeout(Duration::from_secs(5)));
        // The event auto-resets; a second wait times out.
        assert!(!event.wait_timeout(Duration::from_millis(10)));
        handle.join().unwrap();
    }
}
