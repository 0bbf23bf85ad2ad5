//! Greedy canonicalization driven to a fixpoint over a FIFO worklist.
//!
//! The worklist starts with every op in pre-order. Whenever a rewrite
//! commits, the ops it touched (new ops, readers of replacement values,
//! producers of operands that may have become dead) are appended at the
//! back. The pass ends when the worklist drains, when the rewrite budget is
//! spent, or when the cancellation flag is raised between two items.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::fold::{FoldPattern, FoldRegistry};
use super::pattern::{PatternSet, RewritePattern};
use super::rewriter::{PatternRewriter, apply_mutations};
use super::worklist::Worklist;
use super::{RewriteEvent, RewriteListener, RewriteResult};
use crate::context::IrContext;
use crate::dialect::core::Module;
use crate::error::IrError;
use crate::refs::{OpKind, OpRef};
use crate::walk;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizeConfig {
    /// Upper bound on committed rewrites before giving up on a fixpoint.
    pub max_rewrites: usize,
    pub remove_dead_ops: bool,
    pub fold: bool,
}

impl Default for CanonicalizeConfig {
    fn default() -> Self {
        Self {
            max_rewrites: 10_000,
            remove_dead_ops: true,
            fold: true,
        }
    }
}

impl CanonicalizeConfig {
    pub fn with_max_rewrites(mut self, n: usize) -> Self {
        self.max_rewrites = n;
        self
    }

    pub fn with_dead_op_removal(mut self, enabled: bool) -> Self {
        self.remove_dead_ops = enabled;
        self
    }

    pub fn with_folding(mut self, enabled: bool) -> Self {
        self.fold = enabled;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CanonicalizeReport {
    /// Committed pattern applications, folds included.
    pub rewrites: usize,
    pub folds: usize,
    /// Trivially dead ops removed.
    pub erased: usize,
    /// False when the pass stopped with work left (budget or cancellation).
    pub converged: bool,
    pub cancelled: bool,
}

pub struct GreedyRewriteDriver<'a> {
    patterns: &'a PatternSet,
    folders: Option<&'a FoldRegistry>,
    pure_ops: Option<&'a HashSet<OpKind>>,
    config: CanonicalizeConfig,
    cancel: Option<Arc<AtomicBool>>,
    listener: Option<&'a mut dyn RewriteListener>,
}

impl<'a> GreedyRewriteDriver<'a> {
    pub fn new(patterns: &'a PatternSet) -> Self {
        Self {
            patterns,
            folders: None,
            pure_ops: None,
            config: CanonicalizeConfig::default(),
            cancel: None,
            listener: None,
        }
    }

    pub fn with_folders(mut self, folders: &'a FoldRegistry) -> Self {
        self.folders = Some(folders);
        self
    }

    pub fn with_pure_ops(mut self, pure_ops: &'a HashSet<OpKind>) -> Self {
        self.pure_ops = Some(pure_ops);
        self
    }

    pub fn with_config(mut self, config: CanonicalizeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_listener(mut self, listener: &'a mut dyn RewriteListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Run to fixpoint. Only structural errors raised while applying a
    /// rewrite escape; the offending attempt is rolled back first.
    #[tracing::instrument(skip_all)]
    pub fn run(&mut self, ctx: &mut IrContext, module: Module) -> Result<CanonicalizeReport, IrError> {
        let mut report = CanonicalizeReport {
            converged: true,
            ..Default::default()
        };
        let Some(body) = module.body(ctx) else {
            return Ok(report);
        };

        let mut worklist = Worklist::default();
        worklist.extend(walk::collect_ops(ctx, body));

        let fold = self
            .folders
            .filter(|_| self.config.fold)
            .map(FoldPattern::new);
        let patterns = self.patterns;

        while let Some(op) = worklist.pop() {
            if self.cancelled() {
                report.cancelled = true;
                report.converged = false;
                debug!("canonicalization cancelled");
                break;
            }
            if !ctx.is_live(op) || ctx.op(op).parent_block.is_none() {
                continue;
            }
            if self.config.remove_dead_ops && self.is_trivially_dead(ctx, op) {
                trace!(%op, kind = %ctx.op_kind(op), "erasing dead op");
                ctx.detach_op(op);
                ctx.erase_op(op)?;
                report.erased += 1;
                self.emit(ctx, &mut worklist, &RewriteEvent::Erased(op));
                continue;
            }
            if report.rewrites >= self.config.max_rewrites {
                report.converged = false;
                warn!(
                    max_rewrites = self.config.max_rewrites,
                    "canonicalization did not converge; keeping the current graph"
                );
                break;
            }

            let kind = ctx.op_kind(op);
            let mut candidates: SmallVec<[&dyn RewritePattern; 8]> = SmallVec::new();
            if let Some(fold) = &fold {
                candidates.push(fold);
            }
            candidates.extend(patterns.patterns_for(kind));

            for (i, pattern) in candidates.into_iter().enumerate() {
                if self.try_pattern(ctx, op, pattern, &mut worklist)? {
                    report.rewrites += 1;
                    if fold.is_some() && i == 0 {
                        report.folds += 1;
                    }
                    break;
                }
            }
        }

        debug!(
            rewrites = report.rewrites,
            folds = report.folds,
            erased = report.erased,
            converged = report.converged,
            "canonicalization finished"
        );
        Ok(report)
    }

    fn try_pattern(
        &mut self,
        ctx: &mut IrContext,
        op: OpRef,
        pattern: &dyn RewritePattern,
        worklist: &mut Worklist,
    ) -> Result<bool, IrError> {
        let cp = ctx.begin_transaction();
        let mut rewriter = PatternRewriter::new();
        match pattern.match_and_rewrite(ctx, op, &mut rewriter) {
            RewriteResult::Applied if rewriter.has_mutations() => {
                let mut events = Vec::new();
                if let Err(err) = apply_mutations(ctx, op, rewriter, &mut events) {
                    ctx.rollback(cp);
                    return Err(err);
                }
                ctx.commit(cp);
                debug!(pattern = pattern.name(), %op, "pattern applied");
                for event in &events {
                    self.emit(ctx, worklist, event);
                }
                Ok(true)
            }
            RewriteResult::Applied | RewriteResult::Unchanged => {
                ctx.rollback(cp);
                Ok(false)
            }
            RewriteResult::Failed(reason) => {
                ctx.rollback(cp);
                debug!(pattern = pattern.name(), %op, %reason, "rewrite failed; rolled back");
                Ok(false)
            }
        }
    }

    fn emit(&mut self, ctx: &IrContext, worklist: &mut Worklist, event: &RewriteEvent) {
        match event {
            RewriteEvent::Inserted(op) => worklist.push(*op),
            RewriteEvent::Replaced { with, .. } => {
                for &value in with {
                    worklist.push_users(ctx, value);
                    worklist.push_producer(ctx, value);
                }
            }
            RewriteEvent::Erased(op) => {
                for &operand in ctx.op_operands(*op) {
                    worklist.push_producer(ctx, operand);
                }
            }
            RewriteEvent::Modified(op) => {
                worklist.push(*op);
                for &result in ctx.op_results(*op) {
                    worklist.push_users(ctx, result);
                }
                for &operand in ctx.op_operands(*op) {
                    worklist.push_producer(ctx, operand);
                }
            }
        }
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.notify(ctx, event);
        }
    }

    fn is_trivially_dead(&self, ctx: &IrContext, op: OpRef) -> bool {
        self.pure_ops
            .is_some_and(|pure| pure.contains(&ctx.op_kind(op)))
            && ctx.op_results(op).iter().all(|&r| !ctx.has_uses(r))
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
