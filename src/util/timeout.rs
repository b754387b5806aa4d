//! One-shot timeout facility
// (c) 2025 Ross Younger

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle identifying one registered timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie(u64);

/// Callback invoked when a timeout fires. It receives the cookie it was
/// registered under, so the owner can tell a live registration from one it
/// has since replaced.
pub type TimerCallback = Box<dyn FnOnce(Cookie) + Send>;

struct Entry {
    cookie: Cookie,
    deadline: Instant,
    period: Duration,
    callback: TimerCallback,
}

#[derive(Default)]
struct Shared {
    entries: Vec<Entry>,
    next_id: u64,
    shutdown: bool,
}

/// A worker thread firing one-shot timeouts.
///
/// Callbacks run on the worker thread with no facility lock held, so they
/// are free to register or unregister further timeouts. A fired registration
/// is gone; re-arm by registering again.
pub struct TimeoutHandler {
    shared: Arc<(Mutex<Shared>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl TimeoutHandler {
    /// Spawns the worker thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new((Mutex::new(Shared::default()), Condvar::new()));
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("mavftp-timeout".into())
            .spawn(move || run(&worker_shared))
            .ok();
        Self { shared, worker }
    }

    /// Schedules `callback` to fire once, `period` from now.
    pub fn register(&self, callback: TimerCallback, period: Duration) -> Cookie {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let cookie = Cookie(state.next_id);
        state.entries.push(Entry {
            cookie,
            deadline: Instant::now() + period,
            period,
            callback,
        });
        cvar.notify_all();
        cookie
    }

    /// Cancels a registration. A no-op if it already fired.
    pub fn unregister(&self, cookie: Cookie) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.retain(|e| e.cookie != cookie);
        cvar.notify_all();
    }

    /// Pushes a registration's deadline back to a full period from now.
    /// A no-op if it already fired.
    pub fn refresh(&self, cookie: Cookie) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.iter_mut().find(|e| e.cookie == cookie) {
            entry.deadline = Instant::now() + entry.period;
        }
        cvar.notify_all();
    }
}

impl Default for TimeoutHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutHandler {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown = true;
        cvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(shared: &(Mutex<Shared>, Condvar)) {
    let (lock, cvar) = shared;
    let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        let mut due = Vec::new();
        let mut i = 0;
        while i < state.entries.len() {
            if state.entries[i].deadline <= now {
                due.push(state.entries.remove(i));
            } else {
                i += 1;
            }
        }
        if !due.is_empty() {
            // Fire without the lock so callbacks can re-register.
            drop(state);
            for entry in due {
                (entry.callback)(entry.cookie);
            }
            state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            continue;
        }
        state = match state.entries.iter().map(|e| e.deadline).min() {
            None => cvar.wait(state).unwrap_or_else(PoisonError::into_inner),
            Some(next) => {
                let (guard, _) = cvar
                    .wait_timeout(state, next.saturating_duration_since(now))
                    .unwrap_or_else(PoisonError::into_inner);
                guard
            }
        };
    }
}
