//! FIFO worklist with membership de-duplication.

use std::collections::{HashSet, VecDeque};

use crate::context::IrContext;
use crate::refs::{OpRef, ValueRef};

/// Ops waiting to be (re-)examined. Pushing an op that is already queued is
/// a no-op; re-enqueued ops go to the back.
#[derive(Debug, Default)]
pub(crate) struct Worklist {
    queue: VecDeque<OpRef>,
    queued: HashSet<OpRef>,
}

impl Worklist {
    pub(crate) fn push(&mut self, op: OpRef) {
        if self.queued.insert(op) {
            self.queue.push_back(op);
        }
    }

    pub(crate) fn pop(&mut self) -> Option<OpRef> {
        let op = self.queue.pop_front()?;
        self.queued.remove(&op);
        Some(op)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn push_users(&mut self, ctx: &IrContext, value: ValueRef) {
        for u in ctx.uses(value) {
            self.push(u.user);
        }
    }

    pub(crate) fn push_producer(&mut self, ctx: &IrContext, value: ValueRef) {
        if let Some(op) = ctx.value_def(value).op() {
            self.push(op);
        }
    }
}

impl Extend<OpRef> for Worklist {
    fn extend<I: IntoIterator<Item = OpRef>>(&mut self, iter: I) {
        for op in iter {
            self.push(op);
        }
    }
}
