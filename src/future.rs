//! Single-resolution completion handle for save operations
//!
//! A `Future` resolves exactly once, either to a value or to a `SaveError`.
//! Callers register callbacks instead of polling:
//!
//! ```ignore
//! manager
//!     .load::<Progress>("slot1", false)?
//!     .on_success(|result| println!("loaded, backup used: {}", result.used_backup_file))
//!     .on_error(|err| eprintln!("load failed: {}", err))
//!     .on_complete(|_| println!("done"));
//! ```
//!
//! Callbacks registered before resolution run on the thread that resolves
//! the future (usually a worker thread). Callbacks registered afterwards run
//! immediately on the registering thread. For every registration set, the
//! success or error callbacks run before the completion callbacks. A callback
//! that panics on the resolving thread is logged and the rest still run.

use crate::save::SaveError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use tracing::error;

type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorFn = Box<dyn FnOnce(&SaveError) + Send>;
type CompleteFn<T> = Box<dyn FnOnce(Result<&T, &SaveError>) + Send>;

struct Callbacks<T> {
    success: Vec<SuccessFn<T>>,
    error: Vec<ErrorFn>,
    complete: Vec<CompleteFn<T>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Callbacks {
            success: Vec::new(),
            error: Vec::new(),
            complete: Vec::new(),
        }
    }
}

enum State<T> {
    Pending(Callbacks<T>),
    Done(Arc<Result<T, SaveError>>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

/// Handle to the deferred result of a load or save
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Future<T> {
    fn pending() -> Self {
        Future {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Callbacks::default())),
                resolved: Condvar::new(),
            }),
        }
    }

    fn from_result(result: Result<T, SaveError>) -> Self {
        Future {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Done(Arc::new(result))),
                resolved: Condvar::new(),
            }),
        }
    }

    /// An already successful future
    pub fn resolved(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already failed future
    pub fn failed(err: SaveError) -> Self {
        Self::from_result(Err(err))
    }

    /// Runs `work` on the calling thread and returns the finished future
    pub fn run<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, SaveError>,
    {
        Self::from_result(work())
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True once the future holds a value or an error
    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), State::Done(_))
    }

    /// Stores the outcome and fires the pending callbacks
    ///
    /// Returns `false` if the future was already resolved.
    fn resolve(&self, result: Result<T, SaveError>) -> bool {
        let (callbacks, outcome) = {
            let mut state = self.lock();
            if matches!(*state, State::Done(_)) {
                return false;
            }
            let outcome = Arc::new(result);
            let previous = std::mem::replace(&mut *state, State::Done(Arc::clone(&outcome)));
            let State::Pending(callbacks) = previous else {
                return false;
            };
            (callbacks, outcome)
        };
        self.inner.resolved.notify_all();

        match &*outcome {
            Ok(value) => callbacks.success.into_iter().for_each(|f| guarded(|| f(value))),
            Err(err) => callbacks.error.into_iter().for_each(|f| guarded(|| f(err))),
        }
        for f in callbacks.complete {
            guarded(|| f((*outcome).as_ref()));
        }
        true
    }

    /// Registers a callback for a successful result
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.success.push(Box::new(callback));
                    return self;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };
        if let Ok(value) = &*outcome {
            callback(value);
        }
        self
    }

    /// Registers a callback for a failed result
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&SaveError) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.error.push(Box::new(callback));
                    return self;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };
        if let Err(err) = &*outcome {
            callback(err);
        }
        self
    }

    /// Registers a callback that runs after success or error
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Result<&T, &SaveError>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.complete.push(Box::new(callback));
                    return self;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };
        callback((*outcome).as_ref());
        self
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Runs `work` on a background thread
    ///
    /// A panic inside `work` resolves the future with
    /// `SaveError::WorkerPanicked` so waiters are never stranded.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, SaveError> + Send + 'static,
    {
        let future = Self::pending();
        let worker = future.clone();

        let spawned = thread::Builder::new()
            .name("save-worker".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                    error!("save worker panicked");
                    Err(SaveError::WorkerPanicked)
                });
                worker.resolve(result);
            });

        if let Err(e) = spawned {
            future.resolve(Err(e.into()));
        }
        future
    }
}

impl<T: Clone> Future<T> {
    /// The outcome if the future is resolved
    pub fn try_get(&self) -> Option<Result<T, SaveError>> {
        match &*self.lock() {
            State::Pending(_) => None,
            State::Done(outcome) => Some((**outcome).clone()),
        }
    }

    /// Blocks until the future resolves and returns its outcome
    pub fn wait(&self) -> Result<T, SaveError> {
        let mut state = self.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return (**outcome).clone();
            }
            state = self
                .inner
                .resolved
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Runs a callback, logging a panic instead of unwinding the resolving thread
fn guarded<F: FnOnce()>(callback: F) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("save callback panicked");
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match &*self.lock() {
            State::Pending(_) => "pending",
            State::Done(outcome) if outcome.is_ok() => "succeeded",
            State::Done(_) => "failed",
        };
        f.debug_struct("Future").field("status", &status).finish()
    }
}
