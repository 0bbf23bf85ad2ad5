//! `arith` dialect: integer constants and wrapping binary arithmetic.

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect_op;
use crate::location::Location;
use crate::ops::DialectOp;
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::rewrite::fold::{FoldRegistry, FoldResult};
use crate::types::{Attribute, TypeCategory};

crate::symbols! {
    VALUE => "value",
}

dialect_op! {
    pub struct Constant = "arith"."constant";
    pub struct Add = "arith"."add";
    pub struct Sub = "arith"."sub";
    pub struct Mul = "arith"."mul";
}

impl Constant {
    pub fn create(ctx: &mut IrContext, location: Location, ty: TypeRef, value: Attribute) -> Self {
        let data = OperationDataBuilder::of_kind(location, Self::kind())
            .attr(VALUE(), value)
            .result(ty)
            .build(ctx);
        Self(ctx.create_op(data))
    }

    pub fn value<'a>(&self, ctx: &'a IrContext) -> Option<&'a Attribute> {
        ctx.attr(self.0, VALUE())
    }

    pub fn result(&self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

macro_rules! binary_ops {
    ($($name:ident),*) => {
        $(
            impl $name {
                pub fn create(
                    ctx: &mut IrContext,
                    location: Location,
                    lhs: ValueRef,
                    rhs: ValueRef,
                    ty: TypeRef,
                ) -> Self {
                    let data = OperationDataBuilder::of_kind(location, Self::kind())
                        .operand(lhs)
                        .operand(rhs)
                        .result(ty)
                        .build(ctx);
                    Self(ctx.create_op(data))
                }

                pub fn result(&self, ctx: &IrContext) -> ValueRef {
                    ctx.op_result(self.0, 0)
                }
            }
        )*
    };
}

binary_ops!(Add, Sub, Mul);

/// The attribute of the `arith.constant` producing `value`, if any.
pub fn constant_value(ctx: &IrContext, value: ValueRef) -> Option<&Attribute> {
    let op = ctx.value_def(value).op()?;
    Constant::from_op(ctx, op).ok()?.value(ctx)
}

/// Bit width of an integer-like type; `index` counts as 64 bits.
fn int_width(ctx: &IrContext, ty: TypeRef) -> Option<u32> {
    match ctx.types.category(ty) {
        TypeCategory::Index => Some(64),
        TypeCategory::Integer => {
            let name = ctx.types.get(ty).name;
            name.with_str(|s| s.strip_prefix('i').and_then(|w| w.parse().ok()))
        }
        _ => None,
    }
}

/// Sign-extend the low `bits` of `value`.
fn wrap_to_width(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        value
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

fn fold_binary(
    ctx: &IrContext,
    op: OpRef,
    constants: &[Option<Attribute>],
    eval: fn(i64, i64) -> i64,
) -> FoldResult {
    let [Some(lhs), Some(rhs)] = constants else {
        return FoldResult::Unchanged;
    };
    let (Some(lhs), Some(rhs)) = (lhs.as_i64(), rhs.as_i64()) else {
        return FoldResult::Unchanged;
    };
    let Some(&ty) = ctx.op_result_types(op).first() else {
        return FoldResult::Unchanged;
    };
    let Some(bits) = int_width(ctx, ty) else {
        return FoldResult::Unchanged;
    };
    FoldResult::Constant(Attribute::int(wrap_to_width(eval(lhs, rhs), bits)))
}

fn fold_add(ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
    fold_binary(ctx, op, constants, i64::wrapping_add)
}

fn fold_sub(ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
    fold_binary(ctx, op, constants, i64::wrapping_sub)
}

fn fold_mul(ctx: &IrContext, op: OpRef, constants: &[Option<Attribute>]) -> FoldResult {
    fold_binary(ctx, op, constants, i64::wrapping_mul)
}

pub fn register_folders(registry: &mut FoldRegistry) {
    registry.register(Add::kind(), fold_add);
    registry.register(Sub::kind(), fold_sub);
    registry.register(Mul::kind(), fold_mul);
}
