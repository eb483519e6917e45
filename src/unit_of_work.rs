//! Pending cascade operations
//!
//! Relation mutators do not write related rows immediately; they queue
//! [`PendingOp`]s on the entity that owns the relation. `save()` takes the
//! queue and runs deletes before saves.

/// Reference identity, independent of field values
pub trait Identity {
    fn is_same(&self, other: &Self) -> bool;
}

/// One queued cascade operation
#[derive(Debug, Clone)]
pub enum PendingOp<E> {
    Save(E),
    Delete(E),
}

impl<E> PendingOp<E> {
    pub fn target(&self) -> &E {
        match self {
            PendingOp::Save(e) | PendingOp::Delete(e) => e,
        }
    }
}

/// Ordered, identity-deduplicated list of pending operations
#[derive(Debug, Clone)]
pub struct UnitOfWork<E> {
    ops: Vec<PendingOp<E>>,
}

impl<E> Default for UnitOfWork<E> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<E: Identity + Clone> UnitOfWork<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a save; a pending delete of the same target is dropped
    pub fn queue_save(&mut self, target: &E) {
        if self.is_queued_save(target) {
            return;
        }
        self.ops
            .retain(|op| !matches!(op, PendingOp::Delete(e) if e.is_same(target)));
        self.ops.push(PendingOp::Save(target.clone()));
    }

    /// Queue a delete; a pending save of the same target is dropped
    pub fn queue_delete(&mut self, target: &E) {
        if self.is_queued_delete(target) {
            return;
        }
        self.ops
            .retain(|op| !matches!(op, PendingOp::Save(e) if e.is_same(target)));
        self.ops.push(PendingOp::Delete(target.clone()));
    }

    /// Forget every operation on `target`
    pub fn unqueue(&mut self, target: &E) -> bool {
        let before = self.ops.len();
        self.ops.retain(|op| !op.target().is_same(target));
        self.ops.len() != before
    }

    pub fn is_queued_save(&self, target: &E) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PendingOp::Save(e) if e.is_same(target)))
    }

    pub fn is_queued_delete(&self, target: &E) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, PendingOp::Delete(e) if e.is_same(target)))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp<E>> {
        self.ops.iter()
    }

    /// Drain the queue as `(deletes, saves)`, each in queue order
    pub fn take(&mut self) -> (Vec<E>, Vec<E>) {
        let mut deletes = Vec::new();
        let mut saves = Vec::new();
        for op in std::mem::take(&mut self.ops) {
            match op {
                PendingOp::Delete(e) => deletes.push(e),
                PendingOp::Save(e) => saves.push(e),
            }
        }
        (deletes, saves)
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
