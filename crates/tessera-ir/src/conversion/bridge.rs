//! Removal of placeholder bridges that stopped being needed.

use smallvec::SmallVec;

use super::rewriter::ValueVec;
use crate::context::IrContext;
use crate::dialect::core;
use crate::error::IrError;
use crate::refs::{OpRef, RegionRef, TypeRef, ValueRef};
use crate::walk;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeReport {
    /// Bridges erased or folded away.
    pub resolved: usize,
    /// Bridges still in place, in pre-order.
    pub remaining: Vec<OpRef>,
}

impl BridgeReport {
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

fn types_of(ctx: &IrContext, values: &[ValueRef]) -> SmallVec<[TypeRef; 4]> {
    values.iter().map(|&v| ctx.value_ty(v)).collect()
}

fn bridges_in(ctx: &IrContext, region: RegionRef) -> Vec<OpRef> {
    walk::collect_ops(ctx, region)
        .into_iter()
        .filter(|&op| core::is_bridge(ctx, op))
        .collect()
}

/// Repeat until nothing changes:
///
/// - a bridge whose results are unread is erased;
/// - a bridge whose inputs already have its result types is bypassed;
/// - a bridge reading the single result of another bridge whose inputs have
///   the outer result types (pack then unpack, or `A -> B -> A`) is bypassed
///   in favour of those inputs.
///
/// Bypassed bridges lose their readers and go away on the next round.
pub fn resolve_bridges(ctx: &mut IrContext, region: RegionRef) -> Result<BridgeReport, IrError> {
    let mut report = BridgeReport::default();
    loop {
        let mut changed = false;
        for op in bridges_in(ctx, region) {
            if ctx.is_live(op) && resolve_one(ctx, op)? {
                report.resolved += 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    report.remaining = bridges_in(ctx, region);
    tracing::trace!(
        resolved = report.resolved,
        remaining = report.remaining.len(),
        "bridges resolved"
    );
    Ok(report)
}

fn resolve_one(ctx: &mut IrContext, op: OpRef) -> Result<bool, IrError> {
    let results: ValueVec = ctx.op_results(op).into();
    if results.iter().all(|&r| !ctx.has_uses(r)) {
        ctx.detach_op(op);
        ctx.erase_op(op)?;
        return Ok(true);
    }

    let result_types = types_of(ctx, &results);
    let inputs: ValueVec = ctx.op_operands(op).into();
    let sources: Option<ValueVec> = if types_of(ctx, &inputs) == result_types {
        Some(inputs)
    } else if let &[input] = inputs.as_slice()
        && let Some(producer) = ctx.value_def(input).op()
        && core::is_bridge(ctx, producer)
        && types_of(ctx, ctx.op_operands(producer)) == result_types
    {
        Some(ctx.op_operands(producer).into())
    } else {
        None
    };

    let Some(sources) = sources else {
        return Ok(false);
    };
    for (&result, &source) in results.iter().zip(&sources) {
        ctx.replace_all_uses(result, source);
    }
    ctx.detach_op(op);
    ctx.erase_op(op)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;
    use crate::dialect::core::UnrealizedConversionCast;
    use crate::dialect::{arith, func};
    use crate::location::{Location, Span};
    use crate::ops::DialectOp;
    use crate::types::Attribute;

    struct Fixture {
        ctx: IrContext,
        body: RegionRef,
        entry: crate::BlockRef,
        loc: Location,
    }

    fn fixture() -> Fixture {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("bridge.py".to_owned());
        let loc = Location::new(path, Span::new(0, 0));
        let function = func::Func::create(&mut ctx, loc, Symbol::new("f"), &[], &[]);
        let body = function.body(&ctx).unwrap();
        let entry = function.entry_block(&ctx).unwrap();
        Fixture {
            ctx,
            body,
            entry,
            loc,
        }
    }

    fn constant(f: &mut Fixture, ty: TypeRef, value: i64) -> ValueRef {
        let c = arith::Constant::create(&mut f.ctx, f.loc, ty, Attribute::int(value));
        f.ctx.push_op(f.entry, c.op_ref()).unwrap();
        c.result(&f.ctx)
    }

    fn cast(f: &mut Fixture, inputs: &[ValueRef], types: &[TypeRef]) -> UnrealizedConversionCast {
        let cast = UnrealizedConversionCast::create(&mut f.ctx, f.loc, inputs, types);
        f.ctx.push_op(f.entry, cast.op_ref()).unwrap();
        cast
    }

    #[test]
    fn pack_then_unpack_folds_to_the_pieces() {
        let mut f = fixture();
        let i64_ty = core::i64_type(&mut f.ctx);
        let pair = core::tuple_type(&mut f.ctx, &[i64_ty, i64_ty]);
        let a = constant(&mut f, i64_ty, 1);
        let b = constant(&mut f, i64_ty, 2);
        let pack = cast(&mut f, &[a, b], &[pair]);
        let packed = pack.outputs(&f.ctx)[0];
        let unpack = cast(&mut f, &[packed], &[i64_ty, i64_ty]);
        let pieces: ValueVec = unpack.outputs(&f.ctx).into();
        let ret = func::Return::create(&mut f.ctx, f.loc, &pieces);
        f.ctx.push_op(f.entry, ret.op_ref()).unwrap();

        let report = resolve_bridges(&mut f.ctx, f.body).unwrap();

        assert_eq!(report.resolved, 2);
        assert!(report.is_clean());
        assert_eq!(f.ctx.op_operands(ret.op_ref()), &[a, b]);
    }

    #[test]
    fn identity_cast_is_bypassed() {
        let mut f = fixture();
        let i64_ty = core::i64_type(&mut f.ctx);
        let a = constant(&mut f, i64_ty, 1);
        let id = cast(&mut f, &[a], &[i64_ty]);
        let out = id.outputs(&f.ctx)[0];
        let ret = func::Return::create(&mut f.ctx, f.loc, &[out]);
        f.ctx.push_op(f.entry, ret.op_ref()).unwrap();

        let report = resolve_bridges(&mut f.ctx, f.body).unwrap();

        assert_eq!(report.resolved, 1);
        assert!(!f.ctx.is_live(id.op_ref()));
        assert_eq!(f.ctx.op_operands(ret.op_ref()), &[a]);
    }

    #[test]
    fn bridge_with_live_reader_of_other_type_remains() {
        let mut f = fixture();
        let i64_ty = core::i64_type(&mut f.ctx);
        let pair = core::tuple_type(&mut f.ctx, &[i64_ty, i64_ty]);
        let a = constant(&mut f, i64_ty, 1);
        let b = constant(&mut f, i64_ty, 2);
        let pack = cast(&mut f, &[a, b], &[pair]);
        let packed = pack.outputs(&f.ctx)[0];
        let ret = func::Return::create(&mut f.ctx, f.loc, &[packed]);
        f.ctx.push_op(f.entry, ret.op_ref()).unwrap();
        let dead = cast(&mut f, &[a], &[pair]);

        let report = resolve_bridges(&mut f.ctx, f.body).unwrap();

        assert_eq!(report.resolved, 1);
        assert!(!f.ctx.is_live(dead.op_ref()));
        assert_eq!(report.remaining, vec![pack.op_ref()]);
    }
}
