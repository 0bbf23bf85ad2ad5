//! Structural checks run after a pass.
//!
//! 1. **Scope**: every operand reads a value defined somewhere in the module
//!    (a block argument or a result of an attached op), and a value produced
//!    in the same block is produced before it is read.
//! 2. **Use-chain consistency**: the use lists kept by `IrContext` match
//!    the operands, in both directions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;

use derive_more::Display;

use crate::context::IrContext;
use crate::dialect::core::Module;
use crate::refs::{BlockRef, OpKind, OpRef, RegionRef, ValueDef, ValueRef};
use crate::walk::{self, WalkAction};

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum ValidationError {
    #[display("operand #{index} of {kind} ({op}) reads {value}, which is not defined in the module")]
    Undefined {
        op: OpRef,
        kind: OpKind,
        index: u32,
        value: ValueRef,
    },
    #[display("operand #{index} of {kind} ({op}) reads {value} before it is defined")]
    UseBeforeDef {
        op: OpRef,
        kind: OpKind,
        index: u32,
        value: ValueRef,
    },
    #[display("operand #{index} of {op} reads {value} but its use list has no entry")]
    MissingUse { op: OpRef, index: u32, value: ValueRef },
    #[display("use list of {value} names operand #{index} of {op}, which reads something else")]
    StaleUse { op: OpRef, index: u32, value: ValueRef },
}

#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("validation passed");
        }
        writeln!(f, "{} error(s) found:", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

/// Run every check over `module`.
pub fn verify_module(ctx: &IrContext, module: Module) -> ValidationResult {
    let mut result = ValidationResult::default();
    let Some(body) = module.body(ctx) else {
        return result;
    };

    let mut defined = HashSet::new();
    collect_defined_in_region(ctx, body, &mut defined);

    check_scopes_in_region(ctx, body, &defined, &mut result.errors);
    check_use_chains(ctx, body, &defined, &mut result.errors);
    result
}

fn collect_defined_in_region(ctx: &IrContext, region: RegionRef, defined: &mut HashSet<ValueRef>) {
    for &block in &ctx.region(region).blocks {
        defined.extend(ctx.block_args(block).iter().copied());
        for &op in &ctx.block(block).ops {
            defined.extend(ctx.op_results(op).iter().copied());
            for &nested in &ctx.op(op).regions {
                collect_defined_in_region(ctx, nested, defined);
            }
        }
    }
}

fn check_scopes_in_region(
    ctx: &IrContext,
    region: RegionRef,
    defined: &HashSet<ValueRef>,
    errors: &mut Vec<ValidationError>,
) {
    for &block in &ctx.region(region).blocks {
        check_scopes_in_block(ctx, block, defined, errors);
    }
}

fn check_scopes_in_block(
    ctx: &IrContext,
    block: BlockRef,
    defined: &HashSet<ValueRef>,
    errors: &mut Vec<ValidationError>,
) {
    let position: HashMap<OpRef, usize> = ctx
        .block(block)
        .ops
        .iter()
        .enumerate()
        .map(|(i, &op)| (op, i))
        .collect();

    for (pos, &op) in ctx.block(block).ops.iter().enumerate() {
        for (index, &value) in ctx.op_operands(op).iter().enumerate() {
            let index = index as u32;
            if !defined.contains(&value) {
                errors.push(ValidationError::Undefined {
                    op,
                    kind: ctx.op_kind(op),
                    index,
                    value,
                });
                continue;
            }
            if let ValueDef::OpResult(producer, _) = ctx.value_def(value)
                && position.get(&producer).is_some_and(|&p| p >= pos)
            {
                errors.push(ValidationError::UseBeforeDef {
                    op,
                    kind: ctx.op_kind(op),
                    index,
                    value,
                });
            }
        }
        for &nested in &ctx.op(op).regions {
            check_scopes_in_region(ctx, nested, defined, errors);
        }
    }
}

fn check_use_chains(
    ctx: &IrContext,
    body: RegionRef,
    defined: &HashSet<ValueRef>,
    errors: &mut Vec<ValidationError>,
) {
    let _ = walk::walk_region::<()>(ctx, body, &mut |op| {
        for (index, &value) in ctx.op_operands(op).iter().enumerate() {
            let index = index as u32;
            let found = ctx
                .uses(value)
                .iter()
                .any(|u| u.user == op && u.operand_index == index);
            if !found {
                errors.push(ValidationError::MissingUse { op, index, value });
            }
        }
        ControlFlow::Continue(WalkAction::Advance)
    });

    let mut values: Vec<_> = defined.iter().copied().collect();
    values.sort();
    for value in values {
        for u in ctx.uses(value) {
            let points_back = ctx.is_live(u.user)
                && ctx.op_operands(u.user).get(u.operand_index as usize) == Some(&value);
            if !points_back {
                errors.push(ValidationError::StaleUse {
                    op: u.user,
                    index: u.operand_index,
                    value,
                });
            }
        }
    }
}
