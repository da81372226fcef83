//! Deferred write-back of in-memory mutations.
//!
//! A [`DirtyTracker`] records which cleaning operations an object still has
//! to run against its backend. Each operation identity is pending at most
//! once; its arguments are part of the operation value, so registering the
//! same identity again with different arguments is a contract violation.
//!
//! Flushing is not transactional: every pending operation is attempted, the
//! ones that fail stay pending and the first error is returned, while the ones
//! that succeeded stay applied.

use std::fmt;

/// An operation that writes part of an object's state to its backend.
pub trait CleaningOperation: Clone + PartialEq + fmt::Debug {
    type Key: PartialEq + fmt::Debug;

    /// Identity of the operation, regardless of its arguments.
    fn key(&self) -> Self::Key;
}

#[derive(Debug, Clone)]
pub struct DirtyTracker<Op> {
    pending: Vec<Op>,
}

impl<Op> Default for DirtyTracker<Op> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<Op: CleaningOperation> DirtyTracker<Op> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `op` unless an equal operation is already pending.
    ///
    /// # Panics
    ///
    /// If an operation with the same key but different arguments is pending.
    pub fn mark(&mut self, op: Op) {
        if let Some(existing) = self.pending.iter().find(|p| p.key() == op.key()) {
            assert!(
                *existing == op,
                "cleaning operation {:?} registered again with different arguments (pending: {:?})",
                op,
                existing
            );
            return;
        }
        self.pending.push(op);
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Op] {
        &self.pending
    }

    /// Run every pending operation in registration order.
    pub fn flush<E: fmt::Display>(
        &mut self,
        mut run: impl FnMut(&Op) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut first_error = None;
        let mut failed = Vec::new();
        for op in std::mem::take(&mut self.pending) {
            if let Err(e) = run(&op) {
                tracing::warn!("cleaning operation {:?} failed: {}", op, e);
                failed.push(op);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        self.pending = failed;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forget every pending operation without running it.
    pub fn discard(&mut self) {
        self.pending.clear();
    }
}
