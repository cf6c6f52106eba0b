//! Bounded pool of scoped worker threads.

use std::sync::Arc;
use std::thread::{Scope, ScopedJoinHandle};

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::error::MeasureError;

/// Counting semaphore on a mutex and condition variable.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is free. The permit is returned when the guard
    /// is dropped, unwinding included.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
        Permit {
            semaphore: Arc::clone(self),
        }
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }
}

pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

type TaskResult = Result<(), MeasureError>;

/// Runs at most `capacity` tasks at once on threads of `scope`.
pub struct WorkerPool<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    semaphore: Arc<Semaphore>,
    handles: Vec<ScopedJoinHandle<'scope, TaskResult>>,
    failure: Option<MeasureError>,
}

impl<'scope, 'env: 'scope> WorkerPool<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>, capacity: usize) -> WorkerPool<'scope, 'env> {
        WorkerPool {
            scope,
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            handles: Vec::new(),
            failure: None,
        }
    }

    /// Starts `task` as soon as a slot is free. Fails without starting it if
    /// an earlier task has failed.
    pub fn submit<F>(&mut self, task: F) -> TaskResult
    where
        F: FnOnce() -> TaskResult + Send + 'scope,
    {
        self.reap();
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        let permit = self.semaphore.acquire();
        let handle = self.scope.spawn(move || {
            let _permit = permit;
            task()
        });
        self.handles.push(handle);
        Ok(())
    }

    /// Joins every worker and reports the first failure.
    pub fn wait_all(&mut self) -> TaskResult {
        for handle in std::mem::take(&mut self.handles) {
            self.record(handle);
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reap(&mut self) {
        let (finished, running) = std::mem::take(&mut self.handles)
            .into_iter()
            .partition::<Vec<_>, _>(|h| h.is_finished());
        self.handles = running;
        for handle in finished {
            self.record(handle);
        }
    }

    fn record(&mut self, handle: ScopedJoinHandle<'scope, TaskResult>) {
        let result = handle.join().unwrap_or_else(|_| Err(MeasureError::WorkerPanicked));
        if let Err(err) = result {
            if self.failure.is_none() {
                self.failure = Some(err);
            } else {
                error!("{}", err);
            }
        }
    }
}

#[cfg(test)]
#[path = "./pool_test.rs"]
mod pool_test;
