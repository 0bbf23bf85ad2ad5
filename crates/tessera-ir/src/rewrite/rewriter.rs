//! PatternRewriter: the mutations a pattern asks for.
//!
//! Patterns create detached ops through the context and record where they
//! go here. `apply_mutations` splices them into the graph afterwards.

use smallvec::SmallVec;

use super::RewriteEvent;
use crate::context::IrContext;
use crate::error::IrError;
use crate::refs::{OpRef, ValueRef};

pub(crate) enum Replacement {
    Op(OpRef),
    Values(SmallVec<[ValueRef; 4]>),
    Erase,
}

#[derive(Default)]
pub struct PatternRewriter {
    prefix_ops: Vec<OpRef>,
    replacement: Option<Replacement>,
    modified: bool,
}

impl PatternRewriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a detached op before the matched op. Calls accumulate in order.
    pub fn insert_op(&mut self, op: OpRef) {
        self.prefix_ops.push(op);
    }

    /// Replace the matched op with `new_op`, result for result.
    pub fn replace_op(&mut self, new_op: OpRef) {
        debug_assert!(
            self.replacement.is_none(),
            "replace_op called after another replacement"
        );
        self.replacement = Some(Replacement::Op(new_op));
    }

    /// Redirect the matched op's results to existing values, then erase it.
    pub fn replace_with_values(&mut self, values: impl IntoIterator<Item = ValueRef>) {
        debug_assert!(
            self.replacement.is_none(),
            "replace_with_values called after another replacement"
        );
        self.replacement = Some(Replacement::Values(values.into_iter().collect()));
    }

    /// Erase the matched op. Its results must be unused by then.
    pub fn erase_op(&mut self) {
        debug_assert!(
            self.replacement.is_none(),
            "erase_op called after another replacement"
        );
        self.replacement = Some(Replacement::Erase);
    }

    pub fn replace_with_prefix(&mut self, prefix: impl IntoIterator<Item = OpRef>, new_op: OpRef) {
        self.prefix_ops.extend(prefix);
        self.replace_op(new_op);
    }

    /// The matched op was edited in place (attribute or result type).
    pub fn notify_modified(&mut self) {
        self.modified = true;
    }

    pub(crate) fn has_mutations(&self) -> bool {
        !self.prefix_ops.is_empty() || self.replacement.is_some() || self.modified
    }
}

/// Splice a pattern's recorded mutations into the graph.
///
/// Appends one event per primitive change to `events`. Any error leaves a
/// half-applied rewrite behind; callers run this inside a transaction.
pub(crate) fn apply_mutations(
    ctx: &mut IrContext,
    original: OpRef,
    rewriter: PatternRewriter,
    events: &mut Vec<RewriteEvent>,
) -> Result<(), IrError> {
    let block = ctx
        .op(original)
        .parent_block
        .ok_or(IrError::Detached { op: original })?;

    for op in rewriter.prefix_ops {
        ctx.insert_op_before(block, original, op)?;
        events.push(RewriteEvent::Inserted(op));
    }

    match rewriter.replacement {
        None => {}
        Some(Replacement::Op(new_op)) => {
            ctx.insert_op_before(block, original, new_op)?;
            events.push(RewriteEvent::Inserted(new_op));
            let values: SmallVec<[ValueRef; 4]> = ctx.op_results(new_op).into();
            replace_op_values(ctx, original, values, events)?;
        }
        Some(Replacement::Values(values)) => {
            replace_op_values(ctx, original, values, events)?;
        }
        Some(Replacement::Erase) => {
            ctx.detach_op(original);
            ctx.erase_op(original)?;
            events.push(RewriteEvent::Erased(original));
        }
    }

    if rewriter.modified && ctx.is_live(original) {
        events.push(RewriteEvent::Modified(original));
    }
    Ok(())
}

/// RAUW each result of `op` with the matching value, then erase `op`.
pub(crate) fn replace_op_values(
    ctx: &mut IrContext,
    op: OpRef,
    values: SmallVec<[ValueRef; 4]>,
    events: &mut Vec<RewriteEvent>,
) -> Result<(), IrError> {
    let results: SmallVec<[ValueRef; 4]> = ctx.op_results(op).into();
    if results.len() != values.len() {
        return Err(IrError::ArityMismatch {
            op,
            kind: ctx.op_kind(op),
            expected: results.len(),
            actual: values.len(),
        });
    }
    for (&old, &new) in results.iter().zip(values.iter()) {
        ctx.replace_all_uses(old, new);
    }
    events.push(RewriteEvent::Replaced { op, with: values });
    ctx.detach_op(op);
    ctx.erase_op(op)?;
    events.push(RewriteEvent::Erased(op));
    Ok(())
}
