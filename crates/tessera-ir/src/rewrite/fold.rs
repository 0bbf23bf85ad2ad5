//! Fold rules: pure per-kind simplifications applied by the driver.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::RewriteResult;
use super::pattern::RewritePattern;
use super::rewriter::PatternRewriter;
use crate::context::IrContext;
use crate::dialect::arith;
use crate::ops::DialectOp;
use crate::refs::{OpKind, OpRef, ValueRef};
use crate::types::{Attribute, TypeData};

/// What a fold rule concluded about a single-result op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FoldResult {
    Unchanged,
    /// Replace the result with an existing value of identical type.
    Value(ValueRef),
    /// Replace the result with a constant of the result's type.
    Constant(Attribute),
    /// Keep the result value but narrow its declared type to this one.
    RefineType(TypeData),
}

/// `constants[i]` is the attribute of operand `i` when it comes from a constant.
pub type FoldFn = fn(&IrContext, OpRef, &[Option<Attribute>]) -> FoldResult;

#[derive(Default)]
pub struct FoldRegistry {
    folders: HashMap<OpKind, FoldFn>,
}

impl FoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: OpKind, fold: FoldFn) {
        self.folders.insert(kind, fold);
    }

    pub fn contains(&self, kind: OpKind) -> bool {
        self.folders.contains_key(&kind)
    }

    pub fn fold(&self, ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
        match self.folders.get(&ctx.op_kind(op)) {
            Some(fold) => fold(ctx, op, constants),
            None => FoldResult::Unchanged,
        }
    }
}

/// Look through `arith.constant` producers of each operand.
pub fn operand_constants(ctx: &IrContext, op: OpRef) -> SmallVec<[Option<Attribute>; 4]> {
    ctx.op_operands(op)
        .iter()
        .map(|&v| arith::constant_value(ctx, v).cloned())
        .collect()
}

/// Runs the registered fold rule and turns its answer into a rewrite.
pub struct FoldPattern<'a> {
    registry: &'a FoldRegistry,
}

impl<'a> FoldPattern<'a> {
    pub fn new(registry: &'a FoldRegistry) -> Self {
        Self { registry }
    }
}

impl RewritePattern for FoldPattern<'_> {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> RewriteResult {
        if !self.registry.contains(ctx.op_kind(op)) {
            return RewriteResult::Unchanged;
        }
        let &[result] = ctx.op_results(op) else {
            return RewriteResult::Unchanged;
        };
        let result_ty = ctx.value_ty(result);
        let constants = operand_constants(ctx, op);

        match self.registry.fold(ctx, op, &constants) {
            FoldResult::Unchanged => RewriteResult::Unchanged,
            FoldResult::Value(v) if v == result => RewriteResult::Unchanged,
            FoldResult::Value(v) => {
                if ctx.value_ty(v) != result_ty {
                    return RewriteResult::failed("folded value has a different type");
                }
                rewriter.replace_with_values([v]);
                RewriteResult::Applied
            }
            FoldResult::Constant(_) if arith::Constant::matches(ctx, op) => {
                RewriteResult::Unchanged
            }
            FoldResult::Constant(value) => {
                let location = ctx.op(op).location;
                let constant = arith::Constant::create(ctx, location, result_ty, value);
                rewriter.replace_op(constant.op_ref());
                RewriteResult::Applied
            }
            FoldResult::RefineType(data) => {
                let ty = ctx.types.intern(data);
                if ty == result_ty {
                    return RewriteResult::Unchanged;
                }
                ctx.set_value_type(result, ty);
                rewriter.notify_modified();
                RewriteResult::Applied
            }
        }
    }

    fn benefit(&self) -> u16 {
        u16::MAX
    }

    fn name(&self) -> &'static str {
        "fold"
    }
}
