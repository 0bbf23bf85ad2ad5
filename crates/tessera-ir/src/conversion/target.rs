//! Conversion target: which ops may remain after a conversion.

use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

use super::type_converter::TypeConverter;
use crate::Symbol;
use crate::context::IrContext;
use crate::dialect::core;
use crate::location::Location;
use crate::refs::{OpKind, OpRef, RegionRef, TypeRef};
use crate::walk;

/// Result of a legality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegalityCheck {
    Legal,
    Illegal,
}

impl LegalityCheck {
    pub fn is_legal(self) -> bool {
        self == LegalityCheck::Legal
    }
}

impl From<bool> for LegalityCheck {
    fn from(legal: bool) -> Self {
        if legal {
            LegalityCheck::Legal
        } else {
            LegalityCheck::Illegal
        }
    }
}

/// `None` defers to the next rule.
type DynamicCheckFn = dyn Fn(&IrContext, OpRef) -> Option<LegalityCheck>;

/// Legality rules for a conversion.
///
/// Resolution order:
/// 1. Placeholder bridges are always legal; the driver accounts for them
///    separately.
/// 2. Dynamic checks (first non-`None` wins).
/// 3. Specific op rules.
/// 4. Dialect rules.
/// 5. Default: legal iff every operand, result and entry-block argument type
///    is legal under the type converter.
#[derive(Default)]
pub struct ConversionTarget {
    legal_dialects: HashSet<Symbol>,
    illegal_dialects: HashSet<Symbol>,
    legal_ops: HashSet<OpKind>,
    illegal_ops: HashSet<OpKind>,
    dynamic_checks: Vec<Box<DynamicCheckFn>>,
}

impl ConversionTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_legal_dialect(&mut self, dialect: impl Into<Symbol>) -> &mut Self {
        self.legal_dialects.insert(dialect.into());
        self
    }

    pub fn add_illegal_dialect(&mut self, dialect: impl Into<Symbol>) -> &mut Self {
        self.illegal_dialects.insert(dialect.into());
        self
    }

    pub fn add_legal_op(&mut self, kind: OpKind) -> &mut Self {
        self.legal_ops.insert(kind);
        self
    }

    pub fn add_illegal_op(&mut self, kind: OpKind) -> &mut Self {
        self.illegal_ops.insert(kind);
        self
    }

    /// Return `Some(Legal)` or `Some(Illegal)` to decide, `None` to defer.
    pub fn add_dynamic_check(
        &mut self,
        f: impl Fn(&IrContext, OpRef) -> Option<LegalityCheck> + 'static,
    ) -> &mut Self {
        self.dynamic_checks.push(Box::new(f));
        self
    }

    pub fn is_legal(&self, ctx: &IrContext, op: OpRef, converter: &TypeConverter) -> LegalityCheck {
        if core::is_bridge(ctx, op) {
            return LegalityCheck::Legal;
        }
        if let Some(result) = self.dynamic_checks.iter().find_map(|check| check(ctx, op)) {
            return result;
        }

        let kind = ctx.op_kind(op);
        if self.legal_ops.contains(&kind) {
            return LegalityCheck::Legal;
        }
        if self.illegal_ops.contains(&kind) {
            return LegalityCheck::Illegal;
        }
        if self.legal_dialects.contains(&kind.dialect) {
            return LegalityCheck::Legal;
        }
        if self.illegal_dialects.contains(&kind.dialect) {
            return LegalityCheck::Illegal;
        }

        signature_types(ctx, op)
            .iter()
            .all(|&ty| converter.is_legal(ctx, ty))
            .into()
    }

    /// Every illegal op under `region`, in pre-order.
    pub fn verify(&self, ctx: &IrContext, region: RegionRef, converter: &TypeConverter) -> Vec<IllegalOp> {
        let mut illegal = Vec::new();
        let _ = walk::walk_region::<()>(ctx, region, &mut |op| {
            if !self.is_legal(ctx, op, converter).is_legal() {
                illegal.push(IllegalOp::new(ctx, op, unconverted_reason(ctx, op, converter)));
            }
            ControlFlow::Continue(walk::WalkAction::Advance)
        });
        illegal
    }
}

/// Operand, result and entry-block argument types of `op`.
fn signature_types(ctx: &IrContext, op: OpRef) -> Vec<TypeRef> {
    let mut types: Vec<TypeRef> = ctx.op_operands(op).iter().map(|&v| ctx.value_ty(v)).collect();
    types.extend_from_slice(ctx.op_result_types(op));
    for &region in &ctx.op(op).regions {
        if let Some(&entry) = ctx.region(region).blocks.first() {
            types.extend(ctx.block(entry).args.iter().map(|a| a.ty));
        }
    }
    types
}

fn unconverted_reason(ctx: &IrContext, op: OpRef, converter: &TypeConverter) -> String {
    signature_types(ctx, op)
        .into_iter()
        .find_map(|ty| converter.convert_type(ctx, ty).err())
        .map_or_else(
            || "no conversion pattern applied".to_owned(),
            |err| err.to_string(),
        )
}

/// An op left illegal after conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IllegalOp {
    pub op: OpRef,
    pub kind: OpKind,
    pub location: Location,
    pub reason: String,
}

impl IllegalOp {
    pub fn new(ctx: &IrContext, op: OpRef, reason: impl Into<String>) -> Self {
        Self {
            op,
            kind: ctx.op_kind(op),
            location: ctx.op(op).location,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for IllegalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) at {}..{}: {}",
            self.kind, self.op, self.location.span.start, self.location.span.end, self.reason
        )
    }
}
