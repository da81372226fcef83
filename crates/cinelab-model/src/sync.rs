//! Reentrant critical sections.
//!
//! Each package owns one [`CriticalSection`]. Public operations on the
//! package and its elements enter it, so a thread that already holds it can
//! call further operations without deadlocking, while other threads wait.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct CriticalSection {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the current thread holds the section.
    pub fn enter(&self) -> SectionGuard<'_> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((holder, depth)) if *holder == me => {
                    *depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        SectionGuard { section: self }
    }

    /// Whether the current thread holds the section.
    pub fn is_held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        matches!(*lock(&self.owner), Some((holder, _)) if holder == me)
    }

    fn exit(&self) {
        let mut owner = lock(&self.owner);
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.released.notify_one();
            }
        }
    }
}

/// Leaves the critical section when dropped.
#[must_use = "the critical section is left as soon as the guard is dropped"]
pub struct SectionGuard<'a> {
    section: &'a CriticalSection,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        self.section.exit();
    }
}
