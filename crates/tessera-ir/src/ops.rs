//! Typed wrappers over `OpRef` for the built-in dialects.

use derive_more::{Display, Error};

use crate::context::IrContext;
use crate::refs::{OpKind, OpRef};

/// Raised by `DialectOp::from_op` when the op has a different kind.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
#[display("expected {expected}, found {found}")]
pub struct OpMismatch {
    pub expected: OpKind,
    pub found: OpKind,
}

pub trait DialectOp: Sized + Copy {
    const DIALECT_NAME: &'static str;
    const OP_NAME: &'static str;

    fn wrap_unchecked(op: OpRef) -> Self;
    fn op_ref(&self) -> OpRef;

    fn kind() -> OpKind {
        OpKind::new(Self::DIALECT_NAME, Self::OP_NAME)
    }

    fn matches(ctx: &IrContext, op: OpRef) -> bool {
        ctx.op_kind(op) == Self::kind()
    }

    fn from_op(ctx: &IrContext, op: OpRef) -> Result<Self, OpMismatch> {
        if Self::matches(ctx, op) {
            Ok(Self::wrap_unchecked(op))
        } else {
            Err(OpMismatch {
                expected: Self::kind(),
                found: ctx.op_kind(op),
            })
        }
    }
}

/// Declare a `DialectOp` newtype.
///
/// ```ignore
/// dialect_op! {
///     /// `arith.add`
///     pub struct Add = "arith"."add";
/// }
/// ```
#[macro_export]
macro_rules! dialect_op {
    ($($(#[$meta:meta])* $vis:vis struct $name:ident = $dialect:literal . $op:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            $vis struct $name($crate::OpRef);

            impl $crate::ops::DialectOp for $name {
                const DIALECT_NAME: &'static str = $dialect;
                const OP_NAME: &'static str = $op;

                fn wrap_unchecked(op: $crate::OpRef) -> Self {
                    Self(op)
                }

                fn op_ref(&self) -> $crate::OpRef {
                    self.0
                }
            }
        )*
    };
}
