//! Values owned by a single sequence.
//!
//! A [`SequenceBound`] keeps its value behind a runner. Other threads hand
//! it closures with [`SequenceBound::post`]; code already on the owning
//! sequence uses [`SequenceBound::with`]. The mutex is only ever taken on
//! the owning sequence, so it is never contended.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::runner::TaskRunner;

pub struct SequenceBound<T> {
    value: Arc<Mutex<T>>,
    runner: Arc<dyn TaskRunner>,
}

impl<T> Clone for SequenceBound<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            runner: self.runner.clone(),
        }
    }
}

impl<T: Send + 'static> SequenceBound<T> {
    pub fn new(value: T, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            runner,
        }
    }

    /// Run `f` against the value on its owning sequence.
    ///
    /// The posted task holds only a weak reference; if every strong handle
    /// is gone by the time it runs, it does nothing.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        post_weak(&self.runner, Arc::downgrade(&self.value), f)
    }

    /// Access the value synchronously. Must be called on the owning sequence.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        debug_assert!(
            self.runner.runs_tasks_in_current_sequence(),
            "SequenceBound accessed off its sequence"
        );
        f(&mut lock(&self.value))
    }

    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.runner
    }

    pub fn downgrade(&self) -> WeakSequenceBound<T> {
        WeakSequenceBound {
            value: Arc::downgrade(&self.value),
            runner: self.runner.clone(),
        }
    }
}

/// Non-owning handle to a [`SequenceBound`].
pub struct WeakSequenceBound<T> {
    value: Weak<Mutex<T>>,
    runner: Arc<dyn TaskRunner>,
}

impl<T> Clone for WeakSequenceBound<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            runner: self.runner.clone(),
        }
    }
}

impl<T: Send + 'static> WeakSequenceBound<T> {
    pub fn upgrade(&self) -> Option<SequenceBound<T>> {
        self.value.upgrade().map(|value| SequenceBound {
            value,
            runner: self.runner.clone(),
        })
    }

    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        post_weak(&self.runner, self.value.clone(), f)
    }

    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.runner
    }
}

fn post_weak<T, F>(runner: &Arc<dyn TaskRunner>, value: Weak<Mutex<T>>, f: F) -> bool
where
    T: Send + 'static,
    F: FnOnce(&mut T) + Send + 'static,
{
    runner.post_task(Box::new(move || {
        if let Some(value) = value.upgrade() {
            f(&mut lock(&value));
        }
    }))
}

fn lock<T>(value: &Mutex<T>) -> MutexGuard<'_, T> {
    value.lock().unwrap_or_else(|e| e.into_inner())
}
